//! Resolving a fresh download against today's archive.
//!
//! Exactly one canonical file is left at the archive path afterwards:
//! - no archive yet: the download is moved into place
//! - same content: the download is discarded and the archive kept
//! - different content: the archive is replaced by the download

use std::path::Path;
use tracing::info;
use crate::checksums::{ChecksumAlgorithm, ComparisonBasis, ContentComparator, TieredComparator};
use crate::error::EngineError;
use crate::fs_ops::{self, RetryPolicy};
use crate::model::ReconcileOutcome;

pub struct Reconciler {
    comparator: Box<dyn ContentComparator>,
    retry: RetryPolicy,
}

impl Default for Reconciler {
    fn default() -> Self {
        Reconciler::new(
            Box::new(TieredComparator::with_algorithm(ChecksumAlgorithm::Sha256)),
            RetryPolicy::default(),
        )
    }
}

impl Reconciler {
    pub fn new(comparator: Box<dyn ContentComparator>, retry: RetryPolicy) -> Self {
        Reconciler { comparator, retry }
    }

    /// Resolve `downloaded` against `target`.
    ///
    /// # Errors
    /// `ReplaceFailed` if the move could not be completed, or the
    /// comparator's error when neither fingerprints nor sizes are available.
    /// Failing to delete a redundant duplicate is logged, not returned.
    pub fn reconcile(&self, downloaded: &Path, target: &Path) -> Result<ReconcileOutcome, EngineError> {
        if downloaded == target {
            info!(path = %target.display(), "Download already has the archive name");
            return Ok(ReconcileOutcome::Saved);
        }

        if !target.exists() {
            fs_ops::replace_with_retry(downloaded, target, &self.retry)?;
            info!(path = %target.display(), "Saved backup");
            return Ok(ReconcileOutcome::Saved);
        }

        let comparison = self.comparator.compare(target, downloaded)?;
        if comparison.same {
            fs_ops::remove_best_effort(downloaded);
            match comparison.basis {
                ComparisonBasis::Fingerprint => info!(
                    path = %target.display(),
                    "Existing backup already present (skipped creating duplicate)"
                ),
                ComparisonBasis::Size => info!(
                    path = %target.display(),
                    "Existing backup has the same size, presumed duplicate (skipped)"
                ),
            }
            Ok(ReconcileOutcome::SkippedDuplicate)
        } else {
            fs_ops::replace_with_retry(downloaded, target, &self.retry)?;
            info!(path = %target.display(), "Replaced existing backup with new download");
            Ok(ReconcileOutcome::Replaced)
        }
    }
}
