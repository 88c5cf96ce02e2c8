//! Download completion detection.
//!
//! The external download agent (a browser) writes into the download directory
//! on its own schedule. The watcher diffs the directory against a snapshot
//! taken right before the download was triggered and polls until a new entry
//! without an in-progress suffix appears.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use crate::error::EngineError;
use crate::model::{CandidateFile, DownloadSnapshot};

/// Suffixes browsers put on files that are still being written.
///
/// Firefox also creates a zero-byte placeholder under the final name while
/// the `.part` file fills. If the download outlasts the settle grace period
/// that placeholder can be picked up as the finished file.
pub const DEFAULT_IN_PROGRESS_SUFFIXES: &[&str] = &[".crdownload", ".tmp", ".part"];

/// Polling parameters for `wait_for_download`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    /// Total budget for a completed file to appear
    pub timeout: Duration,
    /// Sleep between directory scans
    pub poll_interval: Duration,
    /// Extra wait after a completed file is seen, so the agent can release its
    /// handle. This is a heuristic delay with no guarantee behind it.
    pub grace_period: Duration,
    /// Name suffixes marking a file as still in progress
    pub in_progress_suffixes: Vec<String>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        WatchOptions {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            grace_period: Duration::from_secs(2),
            in_progress_suffixes: DEFAULT_IN_PROGRESS_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl WatchOptions {
    fn is_in_progress(&self, name: &str) -> bool {
        self.in_progress_suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix.as_str()))
    }
}

/// Record the names currently present in `dir`.
///
/// Creates the directory if it does not exist yet.
pub fn take_snapshot(dir: &Path) -> Result<DownloadSnapshot, EngineError> {
    let unavailable = |e| EngineError::DownloadDirUnavailable {
        path: dir.to_path_buf(),
        source: e,
    };

    fs::create_dir_all(dir).map_err(unavailable)?;
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(unavailable)? {
        names.push(entry.map_err(unavailable)?.file_name());
    }
    Ok(DownloadSnapshot::new(names))
}

/// List the regular files in `dir` that are not part of `baseline`.
///
/// Entries that disappear between listing and stat are skipped; the agent
/// renames its partial file when it finishes.
pub fn scan_new_files(
    dir: &Path,
    baseline: &DownloadSnapshot,
    options: &WatchOptions,
) -> Result<Vec<CandidateFile>, EngineError> {
    let unavailable = |e| EngineError::DownloadDirUnavailable {
        path: dir.to_path_buf(),
        source: e,
    };

    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir).map_err(unavailable)? {
        let entry = entry.map_err(unavailable)?;
        let name = entry.file_name();
        if baseline.contains(&name) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                debug!(name = ?name, error = %e, "Entry vanished before stat");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        candidates.push(CandidateFile {
            path: entry.path(),
            size: metadata.len(),
            modified: metadata.modified().map_err(unavailable)?,
            in_progress: options.is_in_progress(&name.to_string_lossy()),
        });
    }
    Ok(candidates)
}

/// Pick the most recently modified completed candidate.
pub fn newest_completed(candidates: &[CandidateFile]) -> Option<&CandidateFile> {
    candidates
        .iter()
        .filter(|c| !c.in_progress)
        .max_by_key(|c| c.modified)
}

/// Poll `dir` until a completed file that is not in `baseline` appears.
///
/// When several completed files are new, the most recently modified one wins.
/// After a file is found the watcher sleeps for `grace_period` and re-checks
/// that the file is still there before returning it.
///
/// # Errors
/// `DownloadTimeout` if nothing qualifies before `timeout` elapses. There is
/// no retry at this level.
pub fn wait_for_download(
    dir: &Path,
    baseline: &DownloadSnapshot,
    options: &WatchOptions,
) -> Result<CandidateFile, EngineError> {
    let started = Instant::now();
    let deadline = started + options.timeout;
    info!(dir = %dir.display(), timeout = ?options.timeout, "Waiting for download to complete...");

    loop {
        let candidates = scan_new_files(dir, baseline, options)?;
        if let Some(found) = newest_completed(&candidates) {
            let found = found.clone();
            debug!(path = %found.path.display(), "Completed download detected");
            thread::sleep(options.grace_period);

            match fs::metadata(&found.path) {
                Ok(metadata) => {
                    let settled = CandidateFile {
                        size: metadata.len(),
                        modified: metadata.modified().unwrap_or(found.modified),
                        ..found
                    };
                    info!(
                        path = %settled.path.display(),
                        size = settled.size,
                        elapsed = ?started.elapsed(),
                        "Download complete"
                    );
                    return Ok(settled);
                }
                Err(e) => {
                    debug!(path = %found.path.display(), error = %e, "Download vanished during grace period");
                }
            }
        } else {
            debug!(pending = candidates.len(), "No completed download yet");
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(options.poll_interval.min(deadline - now));
    }

    Err(EngineError::DownloadTimeout {
        dir: dir.to_path_buf(),
        timeout: options.timeout,
    })
}
