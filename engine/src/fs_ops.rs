//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Moving a file onto its archive path, retrying while another process
//!   (antivirus scanner, the browser itself) holds a lock on it
//! - Falling back to copy + rename when source and destination are on
//!   different filesystems
//! - Best-effort removal of redundant files
//! - Creating directories recursively

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use crate::error::EngineError;

/// Bounded retry with exponential backoff for lock contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for the doubling delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Whether `err` looks like another process holding the file.
pub fn is_lock_contention(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    const CROSS_DEVICE: i32 = 18; // EXDEV
    #[cfg(windows)]
    const CROSS_DEVICE: i32 = 17; // ERROR_NOT_SAME_DEVICE
    #[cfg(not(any(unix, windows)))]
    const CROSS_DEVICE: i32 = -1;

    err.raw_os_error() == Some(CROSS_DEVICE)
}

/// Move `src` to `dst`, replacing `dst` if it exists.
///
/// Uses a rename when possible. Across filesystems the content is copied to
/// a temporary file next to `dst` and renamed into place, so `dst` is never
/// observed half-written.
pub fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!(src = %src.display(), dst = %dst.display(), "Cross-device move, copying instead");
            let staging = staging_path(dst);
            if let Err(e) = copy_file_with_metadata(src, &staging).and_then(|_| fs::rename(&staging, dst)) {
                remove_best_effort(&staging);
                return Err(e);
            }
            remove_best_effort(src);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn staging_path(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dst.with_file_name(format!(".{}.partial", name))
}

/// Move `src` onto `dst`, retrying on lock contention.
///
/// # Errors
/// `ReplaceFailed` carrying the last OS error once attempts are exhausted,
/// or immediately for errors that are not lock contention.
pub fn replace_with_retry(src: &Path, dst: &Path, policy: &RetryPolicy) -> Result<(), EngineError> {
    replace_with_retry_using(src, dst, policy, move_file)
}

pub(crate) fn replace_with_retry_using<F>(
    src: &Path,
    dst: &Path,
    policy: &RetryPolicy,
    mut mover: F,
) -> Result<(), EngineError>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    ensure_parent_dir_exists(dst).map_err(|e| EngineError::ReplaceFailed {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        attempts: 0,
        source: e,
    })?;

    let attempts = policy.attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;
    loop {
        match mover(src, dst) {
            Ok(()) => return Ok(()),
            Err(e) if is_lock_contention(&e) && attempt < attempts => {
                warn!(
                    src = %src.display(),
                    attempt,
                    retry_in = ?delay,
                    error = %e,
                    "File is in use, retrying"
                );
                thread::sleep(delay);
                delay = delay.saturating_mul(2).min(policy.max_delay);
                attempt += 1;
            }
            Err(e) => {
                return Err(EngineError::ReplaceFailed {
                    from: src.to_path_buf(),
                    to: dst.to_path_buf(),
                    attempts: attempt,
                    source: e,
                })
            }
        }
    }
}

/// Remove a file, logging instead of failing.
///
/// Returns whether the file is gone afterwards.
pub fn remove_best_effort(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not remove redundant file");
            false
        }
    }
}

/// Copy a file from source to destination, preserving its modification time.
///
/// # Returns
/// Number of bytes copied
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut src_file = fs::File::open(src)?;
    let src_mtime = src_file.metadata()?.modified().ok();

    let mut dst_file = fs::File::create(dst)?;
    let bytes_copied = io::copy(&mut src_file, &mut dst_file)?;
    dst_file.sync_all()?;
    drop(dst_file);

    if let Some(mtime) = src_mtime {
        let _ = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime));
    }

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Parent path exists but is not a directory",
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(parent),
        Err(e) => Err(e),
    }
}
