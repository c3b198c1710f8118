//! SHA-256 verification of downloaded archives
//!
//! Every Vision archive has a sibling checksum file:
//!
//! ```text
//! d7a8fbb307d7809469ca9abcb0082e4f8d5651e46d3cdb762d02d0bf37c9e592  BTCUSDT-1m-2020-01.zip
//! ```
//!
//! (64-char SHA-256 hex + two spaces + filename). Verification fails soft:
//! a mismatch or a missing checksum file yields `verified=false` with a
//! reason and lands in the checksum ledger; it never halts the run.

use klinesync_core::ArchiveRef;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ledger::stamp;

/// Checksum handling errors
#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("invalid checksum format: {0}")]
    InvalidFormat(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Why an archive passed or failed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyReason {
    /// Digest matches the recorded value
    Ok,
    /// Digest differs from the recorded value
    Mismatch { expected: String, actual: String },
    /// Checksum file absent or unparseable
    ChecksumMissing { detail: String },
    /// Local archive could not be digested
    Unreadable { detail: String },
}

/// Per-archive verification verdict, collected into the checksum ledger
#[derive(Debug, Clone)]
pub struct IntegrityResult {
    pub archive: ArchiveRef,
    pub verified: bool,
    pub reason: VerifyReason,
}

impl IntegrityResult {
    fn new(archive: ArchiveRef, reason: VerifyReason) -> Self {
        Self {
            verified: reason == VerifyReason::Ok,
            archive,
            reason,
        }
    }

    /// One `checksum-report` ledger line
    pub fn ledger_line(&self) -> String {
        let key = &self.archive.key;
        let (status, detail) = match &self.reason {
            VerifyReason::Ok => ("ok", String::new()),
            VerifyReason::Mismatch { expected, actual } => {
                ("mismatch", format!(" expected={expected} actual={actual}"))
            }
            VerifyReason::ChecksumMissing { detail } => ("checksum-missing", format!(" {detail}")),
            VerifyReason::Unreadable { detail } => ("unreadable", format!(" {detail}")),
        };
        format!(
            "{} verify {} {} {} {} {}{}",
            stamp(),
            key.instrument,
            key.symbol,
            key.interval,
            self.archive.month,
            status,
            detail
        )
    }
}

/// Compute the SHA-256 digest of a file as lowercase hex
pub fn compute_sha256(path: &Path) -> Result<String, ChecksumError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Parse the `<hex>  <filename>` checksum file format
///
/// The hash token is normalized to lowercase; surrounding whitespace and
/// the filename column are ignored.
pub fn parse_checksum_file(content: &str) -> Result<String, ChecksumError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ChecksumError::InvalidFormat(
            "empty checksum file".to_string(),
        ));
    }

    let hash = match trimmed.split_whitespace().next() {
        Some(token) => token,
        None => {
            return Err(ChecksumError::InvalidFormat(
                "empty checksum file".to_string(),
            ))
        }
    };

    if hash.len() != 64 {
        return Err(ChecksumError::InvalidFormat(format!(
            "invalid SHA-256 hash length: {} (expected 64)",
            hash.len()
        )));
    }
    if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ChecksumError::InvalidFormat(format!(
            "invalid SHA-256 hash (non-hex characters): {hash}"
        )));
    }

    Ok(hash.to_lowercase())
}

/// Verify one local archive against its recorded digest
pub fn verify_archive(archive: &ArchiveRef, data_root: &Path) -> IntegrityResult {
    let zip_path = archive.zip_path(data_root);
    let checksum_path = archive.checksum_path(data_root);

    let expected = match std::fs::read_to_string(&checksum_path) {
        Ok(content) => match parse_checksum_file(&content) {
            Ok(hash) => hash,
            Err(e) => {
                return IntegrityResult::new(
                    archive.clone(),
                    VerifyReason::ChecksumMissing {
                        detail: e.to_string(),
                    },
                )
            }
        },
        Err(e) => {
            return IntegrityResult::new(
                archive.clone(),
                VerifyReason::ChecksumMissing {
                    detail: format!("cannot read {}: {e}", checksum_path.display()),
                },
            )
        }
    };

    let actual = match compute_sha256(&zip_path) {
        Ok(hash) => hash,
        Err(e) => {
            return IntegrityResult::new(
                archive.clone(),
                VerifyReason::Unreadable {
                    detail: format!("cannot digest {}: {e}", zip_path.display()),
                },
            )
        }
    };

    if actual != expected {
        warn!(
            event_type = "checksum_mismatch",
            symbol = %archive.key.symbol,
            month = %archive.month,
            expected_hash = %expected,
            actual_hash = %actual,
            "Checksum mismatch detected"
        );
        return IntegrityResult::new(archive.clone(), VerifyReason::Mismatch { expected, actual });
    }

    debug!(
        event_type = "checksum_verified",
        symbol = %archive.key.symbol,
        month = %archive.month,
        hash = %actual,
        "Checksum verified"
    );
    IntegrityResult::new(archive.clone(), VerifyReason::Ok)
}

/// Verify a set of local archives in parallel
///
/// Results come back in input order; one archive's mismatch never touches
/// its siblings.
pub fn verify_archives(archives: &[ArchiveRef], data_root: &Path) -> Vec<IntegrityResult> {
    archives
        .par_iter()
        .map(|archive| verify_archive(archive, data_root))
        .collect()
}
