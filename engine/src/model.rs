//! Core data model for backup runs.
//!
//! This module defines the data structures passed between pipeline stages:
//! - DownloadSnapshot: directory listing taken before the download is triggered
//! - CandidateFile: an entry observed in the download directory
//! - ArchiveTarget: the canonical destination path for today's backup
//! - RemoteRecord: identifier and link of an object in the remote store
//! - BackupRun: the record of one end-to-end run

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Names present in the download directory at one point in time.
///
/// Only used as a before/after diff baseline; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSnapshot {
    names: HashSet<OsString>,
}

impl DownloadSnapshot {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        DownloadSnapshot {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &std::ffi::OsStr) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A file observed in the download directory.
///
/// The in-progress flag is derived from a reserved suffix owned by the
/// external download agent. This system observes it and never mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    pub in_progress: bool,
}

/// Canonical destination of a day's backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTarget {
    /// Directory the archive lives in
    pub directory: PathBuf,
    /// File name derived from prefix, date and extension
    pub file_name: String,
}

impl ArchiveTarget {
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

/// An object in the remote store, keyed by name within one folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub id: String,
    pub name: String,
    /// Shareable link; some stores omit it for freshly created objects
    #[serde(default)]
    pub web_view_link: Option<String>,
}

/// How the Reconciler resolved the new download against the archive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No archive existed for today; the download was moved into place
    Saved,
    /// Today's archive already had the same content; the download was discarded
    SkippedDuplicate,
    /// Today's archive had different content and was replaced
    Replaced,
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileOutcome::Saved => write!(f, "saved"),
            ReconcileOutcome::SkippedDuplicate => write!(f, "skipped, already present"),
            ReconcileOutcome::Replaced => write!(f, "replaced"),
        }
    }
}

/// Result of the find-then-upload rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// No same-named object existed; this run created one
    Uploaded(RemoteRecord),
    /// A same-named object was already in the folder; nothing was uploaded
    AlreadyPresent(RemoteRecord),
    /// Remote archival was not requested for this run
    NotRequested,
}

impl RemoteStatus {
    pub fn record(&self) -> Option<&RemoteRecord> {
        match self {
            RemoteStatus::Uploaded(r) | RemoteStatus::AlreadyPresent(r) => Some(r),
            RemoteStatus::NotRequested => None,
        }
    }
}

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Created, not yet started
    Pending,
    /// Waiting on the automation driver or the download directory
    Downloading,
    /// Resolving the download against today's archive
    Reconciling,
    /// Talking to the remote store
    Archiving,
    /// Local archive reconciled and remote copy confirmed (or not requested)
    Completed,
}

/// Record of one end-to-end backup run.
#[derive(Debug, Clone)]
pub struct BackupRun {
    /// Unique identifier for this run
    pub id: Uuid,

    pub state: RunState,

    /// Directory the external agent downloads into
    pub download_dir: PathBuf,

    /// The completed download detected by the watcher
    pub downloaded: Option<CandidateFile>,

    /// Where today's archive lives
    pub target: Option<ArchiveTarget>,

    pub outcome: Option<ReconcileOutcome>,

    pub remote: RemoteStatus,

    pub created_at: SystemTime,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
}

impl BackupRun {
    pub fn new(download_dir: &Path) -> Self {
        BackupRun {
            id: Uuid::new_v4(),
            state: RunState::Pending,
            download_dir: download_dir.to_path_buf(),
            downloaded: None,
            target: None,
            outcome: None,
            remote: RemoteStatus::NotRequested,
            created_at: SystemTime::now(),
            start_time: None,
            end_time: None,
        }
    }

    /// Final local path of the archive, once reconciled.
    pub fn archive_path(&self) -> Option<PathBuf> {
        self.outcome.and(self.target.as_ref()).map(ArchiveTarget::path)
    }
}
