//! Archive extraction with atomic publication
//!
//! Each Vision archive bundles exactly one CSV member; anything else is a
//! corrupt archive and is reported, not silently ignored. The member is
//! written to a `.part` staging file and renamed into place, so a failed
//! or interrupted extraction never leaves a partial file visible to the
//! normalizer.

use klinesync_core::ArchiveRef;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::checksum;
use crate::ledger::stamp;
use crate::store::part_path;

/// Extraction errors
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("corrupt archive {path}: {detail}")]
    CorruptArchive { path: PathBuf, detail: String },

    #[error("io error for {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Success states of one extraction
#[derive(Debug, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// Member published at the deterministic destination
    Extracted(PathBuf),
    /// Destination already present; extraction is idempotent
    AlreadyExists(PathBuf),
    /// Strict verification gated this archive out
    SkippedUnverified,
}

/// Extraction policy knobs
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractPolicy {
    /// Only extract archives that pass a fresh checksum verification
    pub strict_verification: bool,
    /// Remove the source archive once the extracted file is confirmed readable
    pub delete_archives: bool,
}

/// Aggregate result of one extract stage run
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub extracted: usize,
    pub existing: usize,
    pub skipped_unverified: usize,
    pub failed: Vec<(ArchiveRef, String)>,
}

impl ExtractReport {
    /// `checksum-report` lines for archives that failed extraction
    pub fn ledger_lines(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|(archive, detail)| {
                format!(
                    "{} extract {} {} {} {} corrupt {detail}",
                    stamp(),
                    archive.key.instrument,
                    archive.key.symbol,
                    archive.key.interval,
                    archive.month
                )
            })
            .collect()
    }
}

/// Extract the single data member of one archive
pub fn extract_archive(
    archive: &ArchiveRef,
    data_root: &Path,
    policy: ExtractPolicy,
) -> Result<ExtractOutcome, ExtractError> {
    let zip_path = archive.zip_path(data_root);
    let dest = archive.csv_path(data_root);

    if dest.exists() {
        debug!(
            event_type = "extract_exists",
            symbol = %archive.key.symbol,
            month = %archive.month,
            "Destination already present"
        );
        return Ok(ExtractOutcome::AlreadyExists(dest));
    }

    if policy.strict_verification {
        let result = checksum::verify_archive(archive, data_root);
        if !result.verified {
            warn!(
                event_type = "extract_gated",
                symbol = %archive.key.symbol,
                month = %archive.month,
                "Skipping unverified archive under strict verification"
            );
            return Ok(ExtractOutcome::SkippedUnverified);
        }
    }

    let file = File::open(&zip_path).map_err(|source| ExtractError::Io {
        path: zip_path.clone(),
        source,
    })?;
    let mut zip = ZipArchive::new(file).map_err(|e| ExtractError::CorruptArchive {
        path: zip_path.clone(),
        detail: e.to_string(),
    })?;

    if zip.len() != 1 {
        return Err(ExtractError::CorruptArchive {
            path: zip_path.clone(),
            detail: format!("expected 1 member, found {}", zip.len()),
        });
    }

    let mut member = zip.by_index(0).map_err(|e| ExtractError::CorruptArchive {
        path: zip_path.clone(),
        detail: e.to_string(),
    })?;

    let expected_member = archive.csv_member_name();
    if member.name() != expected_member {
        return Err(ExtractError::CorruptArchive {
            path: zip_path.clone(),
            detail: format!(
                "unexpected member {} (expected {expected_member})",
                member.name()
            ),
        });
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|source| ExtractError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let staging = part_path(&dest);
    let mut out = File::create(&staging).map_err(|source| ExtractError::Io {
        path: staging.clone(),
        source,
    })?;
    io::copy(&mut member, &mut out).map_err(|e| ExtractError::CorruptArchive {
        path: zip_path.clone(),
        detail: format!("member read failed: {e}"),
    })?;
    drop(out);
    fs::rename(&staging, &dest).map_err(|source| ExtractError::Io {
        path: dest.clone(),
        source,
    })?;

    if policy.delete_archives {
        // Never delete before the extracted file is known readable
        confirm_readable(&dest)?;
        match fs::remove_file(&zip_path) {
            Ok(()) => debug!(
                event_type = "archive_deleted",
                symbol = %archive.key.symbol,
                month = %archive.month,
                "Removed source archive"
            ),
            Err(e) => warn!(
                event_type = "archive_delete_failed",
                symbol = %archive.key.symbol,
                month = %archive.month,
                error = %e,
                "Could not remove source archive"
            ),
        }
    }

    info!(
        event_type = "extracted",
        symbol = %archive.key.symbol,
        month = %archive.month,
        "Extracted archive member"
    );
    Ok(ExtractOutcome::Extracted(dest))
}

fn confirm_readable(path: &Path) -> Result<(), ExtractError> {
    let mut file = File::open(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut probe = [0u8; 1];
    file.read(&mut probe).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Extract a set of archives in parallel
///
/// A corrupt archive is recorded and skipped; siblings proceed.
pub fn extract_archives(
    archives: &[ArchiveRef],
    data_root: &Path,
    policy: ExtractPolicy,
) -> ExtractReport {
    let results: Vec<(&ArchiveRef, Result<ExtractOutcome, ExtractError>)> = archives
        .par_iter()
        .map(|archive| (archive, extract_archive(archive, data_root, policy)))
        .collect();

    let mut report = ExtractReport::default();
    for (archive, result) in results {
        match result {
            Ok(ExtractOutcome::Extracted(_)) => report.extracted += 1,
            Ok(ExtractOutcome::AlreadyExists(_)) => report.existing += 1,
            Ok(ExtractOutcome::SkippedUnverified) => report.skipped_unverified += 1,
            Err(e) => {
                warn!(
                    event_type = "extract_failed",
                    symbol = %archive.key.symbol,
                    month = %archive.month,
                    error = %e,
                    "Extraction failed"
                );
                report.failed.push((archive.clone(), e.to_string()));
            }
        }
    }

    info!(
        event_type = "extract_complete",
        extracted = report.extracted,
        existing = report.existing,
        skipped = report.skipped_unverified,
        failed = report.failed.len(),
        "Extract stage finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use klinesync_core::{InstrumentType, SymbolKey};
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::{SimpleFileOptions, ZipWriter};

    fn sample_ref() -> ArchiveRef {
        let key = SymbolKey::new(InstrumentType::Spot, "BTCUSDT", "1m");
        ArchiveRef::new(key, "2024-01".parse().unwrap())
    }

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        for (name, content) in members {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_extract_then_already_exists() {
        let dir = tempdir().unwrap();
        let archive = sample_ref();
        let member = archive.csv_member_name();
        let content: &[u8] = b"1704099780000,1,2,3,4,5,1704099839999,6,7,8,9,0\n";
        write_zip(&archive.zip_path(dir.path()), &[(member.as_str(), content)]);

        let first = extract_archive(&archive, dir.path(), ExtractPolicy::default()).unwrap();
        let dest = archive.csv_path(dir.path());
        assert_eq!(first, ExtractOutcome::Extracted(dest.clone()));
        assert_eq!(fs::read(&dest).unwrap(), content);

        let second = extract_archive(&archive, dir.path(), ExtractPolicy::default()).unwrap();
        assert_eq!(second, ExtractOutcome::AlreadyExists(dest.clone()));
        assert_eq!(fs::read(&dest).unwrap(), content);
    }

    #[test]
    fn test_multi_member_archive_is_corrupt() {
        let dir = tempdir().unwrap();
        let archive = sample_ref();
        write_zip(
            &archive.zip_path(dir.path()),
            &[("a.csv", b"x".as_slice()), ("b.csv", b"y".as_slice())],
        );

        let result = extract_archive(&archive, dir.path(), ExtractPolicy::default());
        assert!(matches!(
            result,
            Err(ExtractError::CorruptArchive { .. })
        ));
        assert!(!archive.csv_path(dir.path()).exists());
    }

    #[test]
    fn test_misnamed_member_is_corrupt() {
        let dir = tempdir().unwrap();
        let archive = sample_ref();
        write_zip(
            &archive.zip_path(dir.path()),
            &[("ETHUSDT-1m-2024-01.csv", b"x".as_slice())],
        );

        let result = extract_archive(&archive, dir.path(), ExtractPolicy::default());
        assert!(matches!(result, Err(ExtractError::CorruptArchive { .. })));
    }

    #[test]
    fn test_garbage_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let archive = sample_ref();
        let zip_path = archive.zip_path(dir.path());
        fs::create_dir_all(zip_path.parent().unwrap()).unwrap();
        fs::write(&zip_path, b"this is not a zip file").unwrap();

        let result = extract_archive(&archive, dir.path(), ExtractPolicy::default());
        assert!(matches!(result, Err(ExtractError::CorruptArchive { .. })));
    }

    #[test]
    fn test_delete_after_extract_keeps_output() {
        let dir = tempdir().unwrap();
        let archive = sample_ref();
        let member = archive.csv_member_name();
        let content: &[u8] = b"1704099780000,1,2,3,4,5,1704099839999,6,7,8,9,0\n";
        write_zip(&archive.zip_path(dir.path()), &[(member.as_str(), content)]);

        let policy = ExtractPolicy {
            delete_archives: true,
            ..ExtractPolicy::default()
        };
        extract_archive(&archive, dir.path(), policy).unwrap();

        assert!(!archive.zip_path(dir.path()).exists());
        assert_eq!(fs::read(archive.csv_path(dir.path())).unwrap(), content);
    }

    #[test]
    fn test_strict_verification_gates_unverified() {
        let dir = tempdir().unwrap();
        let archive = sample_ref();
        let member = archive.csv_member_name();
        write_zip(
            &archive.zip_path(dir.path()),
            &[(member.as_str(), b"content".as_slice())],
        );
        // No checksum file on disk, so strict mode must refuse to extract

        let policy = ExtractPolicy {
            strict_verification: true,
            ..ExtractPolicy::default()
        };
        let outcome = extract_archive(&archive, dir.path(), policy).unwrap();
        assert_eq!(outcome, ExtractOutcome::SkippedUnverified);
        assert!(!archive.csv_path(dir.path()).exists());
    }
}
