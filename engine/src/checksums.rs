//! Content fingerprinting and file comparison.
//!
//! This module provides:
//! - 32-byte content digests (SHA-256, BLAKE3) over a file's full byte stream
//! - The `ContentComparator` capability used by the Reconciler, with a
//!   fingerprint-based primary, a size-based fallback, and a tiered
//!   combination of the two

use crate::error::EngineError;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Supported fingerprint algorithms. Both produce 32-byte digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChecksumAlgorithm {
    /// SHA-256 (cryptographic, 256-bit)
    #[default]
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl ChecksumAlgorithm {
    /// Parse algorithm from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Some(Self::Sha256),
            "blake3" => Some(Self::Blake3),
            _ => None,
        }
    }
}

/// A content digest. Two files are the same backup iff their fingerprints
/// are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    algorithm: ChecksumAlgorithm,
    digest: [u8; 32],
}

impl Fingerprint {
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Lowercase hex representation
    pub fn hex(&self) -> String {
        self.digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex())
    }
}

/// Incremental digest computation
trait FingerprintHasher {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Fingerprint;
}

struct Sha256Hasher {
    hasher: sha2::Sha256,
}

impl FingerprintHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> Fingerprint {
        use sha2::Digest;
        Fingerprint {
            algorithm: ChecksumAlgorithm::Sha256,
            digest: self.hasher.finalize().into(),
        }
    }
}

struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl FingerprintHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> Fingerprint {
        Fingerprint {
            algorithm: ChecksumAlgorithm::Blake3,
            digest: *self.hasher.finalize().as_bytes(),
        }
    }
}

fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn FingerprintHasher> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => Box::new(Sha256Hasher {
            hasher: sha2::Sha256::default(),
        }),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher {
            hasher: blake3::Hasher::new(),
        }),
    }
}

/// Fingerprint an in-memory byte sequence.
pub fn fingerprint_bytes(data: &[u8], algorithm: ChecksumAlgorithm) -> Fingerprint {
    let mut hasher = create_hasher(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Fingerprint a file, streaming it in fixed-size chunks.
///
/// # Errors
/// Returns `EngineError::HashFailure` if the file cannot be opened or read.
pub fn compute_file_fingerprint(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<Fingerprint, EngineError> {
    let hash_failure = |e| EngineError::HashFailure {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = File::open(path).map_err(hash_failure)?;
    let mut hasher = create_hasher(algorithm);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(hash_failure(e)),
        }
    }

    Ok(hasher.finalize())
}

/// What decided a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonBasis {
    /// Content digests were compared (authoritative)
    Fingerprint,
    /// Only file sizes were compared (presumptive)
    Size,
}

/// Outcome of comparing two files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    pub same: bool,
    pub basis: ComparisonBasis,
}

/// Decides whether two files hold the same backup.
pub trait ContentComparator {
    fn compare(&self, existing: &Path, candidate: &Path) -> Result<Comparison, EngineError>;
}

/// Compares full-content fingerprints.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintComparator {
    pub algorithm: ChecksumAlgorithm,
}

impl ContentComparator for FingerprintComparator {
    fn compare(&self, existing: &Path, candidate: &Path) -> Result<Comparison, EngineError> {
        let a = compute_file_fingerprint(existing, self.algorithm)?;
        let b = compute_file_fingerprint(candidate, self.algorithm)?;
        debug!(existing = %a, candidate = %b, "Compared fingerprints");
        Ok(Comparison {
            same: a == b,
            basis: ComparisonBasis::Fingerprint,
        })
    }
}

/// Compares file sizes only. Equal size is a presumptive duplicate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeComparator;

impl ContentComparator for SizeComparator {
    fn compare(&self, existing: &Path, candidate: &Path) -> Result<Comparison, EngineError> {
        let size_of = |path: &Path| {
            std::fs::metadata(path)
                .map(|m| m.len())
                .map_err(|e| EngineError::HashFailure {
                    path: path.to_path_buf(),
                    source: e,
                })
        };
        Ok(Comparison {
            same: size_of(existing)? == size_of(candidate)?,
            basis: ComparisonBasis::Size,
        })
    }
}

/// Runs the primary comparator and falls back to the secondary one when the
/// primary reports a recoverable error (`HashFailure`). Fatal errors pass
/// through.
pub struct TieredComparator {
    primary: Box<dyn ContentComparator>,
    fallback: Box<dyn ContentComparator>,
}

impl TieredComparator {
    pub fn new(primary: Box<dyn ContentComparator>, fallback: Box<dyn ContentComparator>) -> Self {
        TieredComparator { primary, fallback }
    }

    /// Fingerprints with `algorithm`, falling back to file sizes.
    pub fn with_algorithm(algorithm: ChecksumAlgorithm) -> Self {
        Self::new(
            Box::new(FingerprintComparator { algorithm }),
            Box::new(SizeComparator),
        )
    }
}

impl ContentComparator for TieredComparator {
    fn compare(&self, existing: &Path, candidate: &Path) -> Result<Comparison, EngineError> {
        match self.primary.compare(existing, candidate) {
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, "Error calculating hash, falling back to size comparison");
                let comparison = self.fallback.compare(existing, candidate)?;
                if comparison.same && comparison.basis == ComparisonBasis::Size {
                    warn!("Sizes match; treating the new download as a presumptive duplicate");
                }
                Ok(comparison)
            }
            other => other,
        }
    }
}
