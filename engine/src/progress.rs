//! Run observer trait.
//!
//! Decouples the pipeline from whatever front-end reports on it. The CLI
//! prints a one-line summary per stage; tests record the call order.

use crate::model::BackupRun;

/// Receives stage events from a backup run.
///
/// All methods are called synchronously on the pipeline's thread, after the
/// corresponding field of `run` has been filled in.
pub trait ProgressCallback: Send {
    /// Called once the run has a start time, before anything touches disk.
    fn on_run_started(&self, run: &BackupRun);

    /// Called when the watcher settles on a completed download.
    fn on_download_detected(&self, run: &BackupRun);

    /// Called after the download has been resolved against today's archive.
    fn on_reconciled(&self, run: &BackupRun);

    /// Called after the remote copy was found or created.
    ///
    /// Not called when remote archival was not requested.
    fn on_remote_resolved(&self, run: &BackupRun);

    fn on_run_completed(&self, run: &BackupRun);
}
