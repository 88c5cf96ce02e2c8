//! Backup pipeline.
//!
//! One run is strictly linear:
//! snapshot → trigger → wait → name → reconcile → ensure archived.
//! Any error aborts the run; there is no partial-success state.

use std::path::PathBuf;
use std::time::SystemTime;
use chrono::NaiveDate;
use tracing::info;
use crate::automation::AutomationDriver;
use crate::error::EngineError;
use crate::model::{BackupRun, RunState};
use crate::namer;
use crate::progress::ProgressCallback;
use crate::reconcile::Reconciler;
use crate::remote::{RemoteArchivist, RemoteStore, UploadMetadata};
use crate::watcher::{self, WatchOptions};

/// Inputs of a single run.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Directory the automation driver downloads into
    pub download_dir: PathBuf,
    /// Directory today's archive lives in
    pub archive_dir: PathBuf,
    pub prefix: Option<String>,
    /// Date the archive is named after
    pub date: NaiveDate,
    pub watch: WatchOptions,
    /// Extra metadata attached to a new remote object
    pub metadata: UploadMetadata,
}

/// Run one backup end to end.
///
/// With `archivist` set to `None` the run stops after local reconciliation
/// and reports `RemoteStatus::NotRequested`.
///
/// # Errors
/// The first failing stage's error, unchanged.
pub fn run_backup<S: RemoteStore>(
    options: &BackupOptions,
    driver: &mut dyn AutomationDriver,
    reconciler: &Reconciler,
    archivist: Option<&RemoteArchivist<S>>,
    progress: Option<&dyn ProgressCallback>,
) -> Result<BackupRun, EngineError> {
    let mut run = BackupRun::new(&options.download_dir);
    run.state = RunState::Downloading;
    run.start_time = Some(SystemTime::now());
    info!(run = %run.id, "=== Starting backup ===");
    if let Some(callback) = progress {
        callback.on_run_started(&run);
    }

    let baseline = watcher::take_snapshot(&options.download_dir)?;
    driver.trigger_download(&options.download_dir)?;
    let downloaded = watcher::wait_for_download(&options.download_dir, &baseline, &options.watch)?;
    run.downloaded = Some(downloaded.clone());
    if let Some(callback) = progress {
        callback.on_download_detected(&run);
    }

    run.state = RunState::Reconciling;
    let target = namer::archive_target(
        &options.archive_dir,
        options.prefix.as_deref(),
        options.date,
        &downloaded.path,
    );
    let archive_path = target.path();
    run.target = Some(target);
    let outcome = reconciler.reconcile(&downloaded.path, &archive_path)?;
    info!(path = %archive_path.display(), %outcome, "Local archive reconciled");
    run.outcome = Some(outcome);
    if let Some(callback) = progress {
        callback.on_reconciled(&run);
    }

    if let Some(archivist) = archivist {
        run.state = RunState::Archiving;
        run.remote = archivist.ensure_archived(&archive_path, &options.metadata)?;
        if let Some(callback) = progress {
            callback.on_remote_resolved(&run);
        }
    }

    run.state = RunState::Completed;
    run.end_time = Some(SystemTime::now());
    info!(run = %run.id, "=== Process completed ===");
    if let Some(callback) = progress {
        callback.on_run_completed(&run);
    }

    Ok(run)
}
