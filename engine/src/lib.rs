//! # cfgbackup engine - router configuration archiver
//!
//! Headless library behind the `cfgbackup` CLI. One run triggers a
//! configuration export on a router's web console, waits for the browser to
//! finish writing it, files it under a dated canonical name, and makes sure
//! a copy with that name exists in a remote folder.
//!
//! ## Overview
//!
//! - Before/after directory diff to find the new download, ignoring
//!   in-progress browser files
//! - Date-based naming: at most one archive per calendar day
//! - Content fingerprints (SHA-256 or BLAKE3) so identical exports are not
//!   rewritten, degrading to a size comparison when a file cannot be read
//! - Lock-tolerant replace with bounded exponential backoff
//! - Find-then-upload against Google Drive with resumable uploads
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use engine::{
//!     run_backup, AppConfig, BackupOptions, DriveClient, Reconciler, RemoteArchivist,
//!     TieredComparator, UploadMetadata,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load(None)?;
//! let client = DriveClient::new(config.drive_credentials()?, Duration::from_secs(120))?;
//! let archivist = RemoteArchivist::new(client, config.folder_id()?)?;
//! let reconciler = Reconciler::new(
//!     Box::new(TieredComparator::with_algorithm(config.checksum_algorithm()?)),
//!     config.retry_policy(),
//! );
//! let options = BackupOptions {
//!     download_dir: config.download_dir.clone(),
//!     archive_dir: config.archive_dir().to_path_buf(),
//!     prefix: config.archive_prefix.clone(),
//!     date: chrono::Local::now().date_naive(),
//!     watch: config.watch_options(),
//!     metadata: UploadMetadata::default(),
//! };
//!
//! let mut driver = config.automation_driver()?;
//! let run = run_backup(&options, &mut driver, &reconciler, Some(&archivist), None)?;
//! println!("Archived to {:?}", run.archive_path());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (BackupRun, CandidateFile, ArchiveTarget, ...)
//! - **error**: Error taxonomy
//! - **checksums**: Fingerprints and content comparators
//! - **watcher**: Download directory snapshot and polling
//! - **namer**: Dated archive names
//! - **fs_ops**: Moves, lock-tolerant replace, best-effort removal
//! - **reconcile**: Download vs. today's archive
//! - **remote**: Remote store trait and the find-then-upload archivist
//! - **gdrive**: Google Drive v3 store
//! - **automation**: Download trigger trait and external-command driver
//! - **config**: Layered configuration
//! - **progress**: Run observer trait
//! - **job**: The pipeline

pub mod model;
pub mod error;
pub mod checksums;
pub mod watcher;
pub mod namer;
pub mod fs_ops;
pub mod reconcile;
pub mod remote;
pub mod gdrive;
pub mod automation;
pub mod config;
pub mod progress;
pub mod job;

#[cfg(test)]
mod testing;

// Re-export main types and functions
pub use model::{
    ArchiveTarget, BackupRun, CandidateFile, DownloadSnapshot, ReconcileOutcome, RemoteRecord,
    RemoteStatus, RunState,
};
pub use error::EngineError;
pub use checksums::{
    compute_file_fingerprint, ChecksumAlgorithm, ContentComparator, Fingerprint,
    FingerprintComparator, SizeComparator, TieredComparator,
};
pub use watcher::{take_snapshot, wait_for_download, WatchOptions};
pub use namer::{archive_name, archive_target};
pub use fs_ops::RetryPolicy;
pub use reconcile::Reconciler;
pub use remote::{FileQuery, RemoteArchivist, RemoteStore, UploadMetadata};
pub use gdrive::{DriveClient, DriveCredentials};
pub use automation::{AutomationDriver, CommandDriver};
pub use config::AppConfig;
pub use progress::ProgressCallback;
pub use job::{run_backup, BackupOptions};
