//! Error types for the backup engine.
//!
//! The primary error type is `EngineError`. Every variant maps to one stage of
//! the pipeline so that the operator-facing message says which step failed.
//! Only `HashFailure` is recoverable: the tiered comparator in `checksums`
//! degrades to a size comparison when it sees one. Everything else aborts
//! the run.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while producing and archiving a backup.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The UI automation step (login, navigation, clicking download) failed.
    #[error("Automation failure: {message}")]
    AutomationFailure { message: String },

    /// No completed new file appeared in the download directory in time.
    #[error(
        "Download timeout: no completed file appeared in {} within {}s",
        dir.display(),
        timeout.as_secs_f64()
    )]
    DownloadTimeout { dir: PathBuf, timeout: Duration },

    /// The download directory could not be created or listed.
    #[error("Download directory unavailable: {}", path.display())]
    DownloadDirUnavailable { path: PathBuf, source: io::Error },

    /// A file could not be read while computing its fingerprint.
    #[error("Hash failure: could not fingerprint {}", path.display())]
    HashFailure { path: PathBuf, source: io::Error },

    /// Moving the download onto the archive path failed, after retries when
    /// the failure looked like lock contention.
    #[error(
        "Replace failed: could not move {} to {} after {} attempt(s): {}",
        from.display(),
        to.display(),
        attempts,
        source
    )]
    ReplaceFailed {
        from: PathBuf,
        to: PathBuf,
        attempts: u32,
        source: io::Error,
    },

    /// A local file that should exist does not.
    #[error("File not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// The long-lived remote credential was rejected.
    #[error(
        "Remote authentication failed: {message}. Check GDRIVE_CLIENT_ID, \
         GDRIVE_CLIENT_SECRET and GDRIVE_REFRESH_TOKEN in your configuration"
    )]
    RemoteAuthFailure { message: String },

    /// The destination folder does not exist or is not visible to the account.
    #[error(
        "Remote folder not found or not accessible: '{folder_id}'. Make sure the \
         ID is correct and the authenticated user has access to it"
    )]
    RemoteFolderNotFound { folder_id: String },

    /// Any other network or API error from the remote store.
    #[error("Remote transport failure: {message}")]
    RemoteTransportFailure { message: String },

    /// A configuration value is missing or unusable.
    #[error("Invalid configuration for '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::DownloadDirUnavailable { source, .. }
            | Self::HashFailure { source, .. }
            | Self::ReplaceFailed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Whether this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::HashFailure { .. })
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::RemoteTransportFailure {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_config(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::RemoteTransportFailure {
            message: err.to_string(),
        }
    }
}
