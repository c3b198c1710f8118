//! Offline end-to-end flow over real archive fixtures
//!
//! Builds genuine ZIP archives and checksum files on disk, then drives
//! verify, extract, normalize and audit against them the same way the CLI
//! does, asserting the cross-stage behavior: soft verification failures,
//! idempotent extraction, keep-last deduplication and gap detection.

use klinesync_core::{ArchiveRef, InstrumentType, NormalizedKline, SymbolKey};
use klinesync_pipeline::{
    audit_symbol, extract_archives, normalize_symbol, verify_archives, AuditOutcome,
    ExtractPolicy, NormalizeOutcome, VerifyReason,
};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use zip::write::{SimpleFileOptions, ZipWriter};

// 2024-01-01 09:00:00 UTC
const T9: i64 = 1_704_099_600_000;
const MINUTE: i64 = 60_000;

fn row(open_time: i64, open: &str) -> String {
    format!(
        "{open_time},{open},101,99,100.5,12.5,{},625.0,42,6.2,310.0,0\n",
        open_time + MINUTE - 1
    )
}

fn write_archive(archive: &ArchiveRef, root: &Path, csv_content: &str, valid_checksum: bool) {
    let zip_path = archive.zip_path(root);
    fs::create_dir_all(zip_path.parent().unwrap()).unwrap();

    let file = File::create(&zip_path).unwrap();
    let mut writer = ZipWriter::new(file);
    writer
        .start_file(archive.csv_member_name(), SimpleFileOptions::default())
        .unwrap();
    writer.write_all(csv_content.as_bytes()).unwrap();
    writer.finish().unwrap();

    let digest = if valid_checksum {
        klinesync_pipeline::compute_sha256(&zip_path).unwrap()
    } else {
        "0".repeat(64)
    };
    fs::write(
        archive.checksum_path(root),
        format!("{digest}  {}.zip\n", archive.file_stem()),
    )
    .unwrap();
}

#[test]
fn full_flow_from_archives_to_gap_report() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let key = SymbolKey::new(InstrumentType::Spot, "BTCUSDT", "1m");
    let january = ArchiveRef::new(key.clone(), "2024-01".parse().unwrap());
    let february = ArchiveRef::new(key.clone(), "2024-02".parse().unwrap());

    // January covers 09:00-09:02 plus a candle at 09:05 that February
    // republishes with a different open; 09:03 is missing everywhere.
    let january_csv = [
        row(T9, "100.0"),
        row(T9 + MINUTE, "100.1"),
        row(T9 + 2 * MINUTE, "100.2"),
        row(T9 + 5 * MINUTE, "stale"),
    ]
    .concat();
    let february_csv = [row(T9 + 4 * MINUTE, "100.4"), row(T9 + 5 * MINUTE, "100.5")].concat();

    write_archive(&january, root, &january_csv, true);
    write_archive(&february, root, &february_csv, false);

    // Verify: the bad checksum is recorded, nothing halts
    let refs = vec![january.clone(), february.clone()];
    let results = verify_archives(&refs, root);
    assert_eq!(results.len(), 2);
    assert!(results[0].verified);
    assert!(!results[1].verified);
    assert!(matches!(results[1].reason, VerifyReason::Mismatch { .. }));

    // Extract: the mismatched sibling still extracts in default (lenient) mode
    let report = extract_archives(&refs, root, ExtractPolicy::default());
    assert_eq!(report.extracted, 2);
    assert!(report.failed.is_empty());

    // Second extraction run is a no-op
    let rerun = extract_archives(&refs, root, ExtractPolicy::default());
    assert_eq!(rerun.extracted, 0);
    assert_eq!(rerun.existing, 2);

    // Normalize: five unique open times, February's 09:05 wins
    let outcome = normalize_symbol(&key, root).unwrap();
    let NormalizeOutcome::Written { path, records } = outcome else {
        panic!("expected merged output");
    };
    assert_eq!(records, 5);

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let merged: Vec<NormalizedKline> = reader.deserialize().collect::<Result<_, _>>().unwrap();
    assert_eq!(merged.len(), 5);
    assert_eq!(merged.last().unwrap().open, "100.5");
    let times: Vec<i64> = merged.iter().map(|r| r.open_time_ms().unwrap()).collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]));

    // Audit: exactly 09:03 is missing
    let AuditOutcome::Gaps(gaps) = audit_symbol(&key, root).unwrap() else {
        panic!("expected a gap report");
    };
    assert_eq!(gaps.missing_count, 1);
    assert_eq!(gaps.missing_ranges, vec![(T9 + 3 * MINUTE, T9 + 3 * MINUTE)]);
}

#[test]
fn strict_mode_gates_only_unverified_archives() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let key = SymbolKey::new(InstrumentType::Um, "ETHUSDT", "1m");
    let good = ArchiveRef::new(key.clone(), "2024-01".parse().unwrap());
    let bad = ArchiveRef::new(key.clone(), "2024-02".parse().unwrap());

    write_archive(&good, root, &row(T9, "1.0"), true);
    write_archive(&bad, root, &row(T9 + MINUTE, "2.0"), false);

    let policy = ExtractPolicy {
        strict_verification: true,
        ..ExtractPolicy::default()
    };
    let report = extract_archives(&[good.clone(), bad.clone()], root, policy);

    assert_eq!(report.extracted, 1);
    assert_eq!(report.skipped_unverified, 1);
    assert!(good.csv_path(root).exists());
    assert!(!bad.csv_path(root).exists());
}
