//! Fixed-interval completeness audit
//!
//! Rebuilds the expected timestamp grid between the first and last observed
//! candle and reports what is missing. Comparison happens at minute
//! resolution for minute-and-coarser intervals, so sub-minute noise in a
//! source file cannot fake a gap.

use klinesync_core::{interval_ms, NormalizedKline, SymbolKey, OPEN_TIME_FORMAT};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ledger::stamp;

const MINUTE_MS: i64 = 60_000;

/// Audit errors
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error(transparent)]
    Record(#[from] klinesync_core::RecordError),
}

/// Missing fixed-interval timestamps for one series
#[derive(Debug, Clone, PartialEq)]
pub struct GapReport {
    pub key: SymbolKey,
    /// Condensed, inclusive `[start, end]` ranges of missing open times
    /// (epoch ms)
    pub missing_ranges: Vec<(i64, i64)>,
    pub missing_count: usize,
}

impl GapReport {
    /// One `gap-report` ledger line per missing range
    pub fn ledger_lines(&self) -> Vec<String> {
        self.missing_ranges
            .iter()
            .map(|(start, end)| {
                format!(
                    "{} gap {} {} {} {}..{}",
                    stamp(),
                    self.key.instrument,
                    self.key.symbol,
                    self.key.interval,
                    format_ms(*start),
                    format_ms(*end)
                )
            })
            .collect()
    }
}

fn format_ms(ms: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(ms) {
        Some(ts) => ts.format(OPEN_TIME_FORMAT).to_string(),
        None => format!("{ms}ms"),
    }
}

/// Result of auditing one series
#[derive(Debug, PartialEq)]
pub enum AuditOutcome {
    Complete,
    Gaps(GapReport),
}

/// Aggregate result of one audit stage run
#[derive(Debug, Default)]
pub struct AuditReport {
    pub complete: usize,
    pub gapped: Vec<GapReport>,
    pub failed: Vec<(SymbolKey, String)>,
}

/// Audit one normalized series against its interval grid
pub fn audit_symbol(key: &SymbolKey, data_root: &Path) -> Result<AuditOutcome, AuditError> {
    let step = interval_ms(&key.interval)?;
    let path = key.merged_csv_path(data_root);
    let file = std::fs::File::open(&path).map_err(|source| AuditError::Io {
        path: path.clone(),
        source,
    })?;

    let mut reader = csv::Reader::from_reader(file);
    let mut observed: Vec<i64> = Vec::new();
    for result in reader.deserialize::<NormalizedKline>() {
        let record = result.map_err(|source| AuditError::Csv {
            path: path.clone(),
            source,
        })?;
        let mut open_time = record.open_time_ms()?;
        if step >= MINUTE_MS {
            open_time -= open_time.rem_euclid(MINUTE_MS);
        }
        observed.push(open_time);
    }

    // A series with fewer than two records has nothing between its
    // endpoints to be missing
    if observed.len() <= 1 {
        return Ok(AuditOutcome::Complete);
    }

    let (first, last) = match (observed.iter().min(), observed.iter().max()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => return Ok(AuditOutcome::Complete),
    };

    let observed_set: HashSet<i64> = observed.into_iter().collect();
    let mut missing = Vec::new();
    let mut expected = first;
    while expected <= last {
        if !observed_set.contains(&expected) {
            missing.push(expected);
        }
        expected += step;
    }

    if missing.is_empty() {
        debug!(
            event_type = "audit_complete",
            symbol = %key.symbol,
            interval = %key.interval,
            "Series is gap-free"
        );
        return Ok(AuditOutcome::Complete);
    }

    let missing_ranges = condense(&missing, step);
    warn!(
        event_type = "gaps_found",
        symbol = %key.symbol,
        interval = %key.interval,
        missing = missing.len(),
        ranges = missing_ranges.len(),
        "Series has missing candles"
    );
    Ok(AuditOutcome::Gaps(GapReport {
        key: key.clone(),
        missing_count: missing.len(),
        missing_ranges,
    }))
}

/// Collapse consecutive missing timestamps into inclusive ranges
fn condense(missing: &[i64], step: i64) -> Vec<(i64, i64)> {
    let mut ranges: Vec<(i64, i64)> = Vec::new();
    for &t in missing {
        match ranges.last_mut() {
            Some((_, end)) if *end + step == t => *end = t,
            _ => ranges.push((t, t)),
        }
    }
    ranges
}

/// Audit a set of keys in parallel
pub fn audit_symbols(keys: &[SymbolKey], data_root: &Path) -> AuditReport {
    let results: Vec<(&SymbolKey, Result<AuditOutcome, AuditError>)> = keys
        .par_iter()
        .map(|key| (key, audit_symbol(key, data_root)))
        .collect();

    let mut report = AuditReport::default();
    for (key, result) in results {
        match result {
            Ok(AuditOutcome::Complete) => report.complete += 1,
            Ok(AuditOutcome::Gaps(gaps)) => report.gapped.push(gaps),
            Err(e) => {
                warn!(
                    event_type = "audit_failed",
                    symbol = %key.symbol,
                    interval = %key.interval,
                    error = %e,
                    "Audit failed"
                );
                report.failed.push((key.clone(), e.to_string()));
            }
        }
    }

    info!(
        event_type = "audit_complete_stage",
        complete = report.complete,
        gapped = report.gapped.len(),
        failed = report.failed.len(),
        "Audit stage finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use klinesync_core::{InstrumentType, RawKline, NormalizedKline};
    use tempfile::tempdir;

    fn sample_key() -> SymbolKey {
        SymbolKey::new(InstrumentType::Spot, "BTCUSDT", "1m")
    }

    // 2024-01-01 09:00:00 UTC
    const T9: i64 = 1_704_099_600_000;
    const MINUTE: i64 = 60_000;

    fn write_series(key: &SymbolKey, root: &Path, open_times: &[i64]) {
        let dir = key.symbol_dir(root);
        std::fs::create_dir_all(&dir).unwrap();
        let mut writer = csv::Writer::from_path(key.merged_csv_path(root)).unwrap();
        for &open_time in open_times {
            let raw = RawKline(
                open_time,
                "1".into(),
                "2".into(),
                "0.5".into(),
                "1.5".into(),
                "10".into(),
                open_time + MINUTE - 1,
                "15".into(),
                3,
                "5".into(),
                "7.5".into(),
                "0".into(),
            );
            writer
                .serialize(NormalizedKline::from_raw(raw).unwrap())
                .unwrap();
        }
        writer.flush().unwrap();
    }

    #[test]
    fn test_single_missing_minute_is_reported() {
        let dir = tempdir().unwrap();
        let key = sample_key();
        // 09:00-09:05 with 09:03 absent
        write_series(
            &key,
            dir.path(),
            &[T9, T9 + MINUTE, T9 + 2 * MINUTE, T9 + 4 * MINUTE, T9 + 5 * MINUTE],
        );

        let outcome = audit_symbol(&key, dir.path()).unwrap();
        let AuditOutcome::Gaps(report) = outcome else {
            panic!("expected gaps");
        };
        assert_eq!(report.missing_count, 1);
        assert_eq!(
            report.missing_ranges,
            vec![(T9 + 3 * MINUTE, T9 + 3 * MINUTE)]
        );
        let lines = report.ledger_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("2024-01-01 09:03:00..2024-01-01 09:03:00"));
    }

    #[test]
    fn test_contiguous_series_is_complete() {
        let dir = tempdir().unwrap();
        let key = sample_key();
        let times: Vec<i64> = (0..10).map(|i| T9 + i * MINUTE).collect();
        write_series(&key, dir.path(), &times);

        assert_eq!(audit_symbol(&key, dir.path()).unwrap(), AuditOutcome::Complete);
    }

    #[test]
    fn test_single_record_short_circuits() {
        let dir = tempdir().unwrap();
        let key = sample_key();
        write_series(&key, dir.path(), &[T9]);

        assert_eq!(audit_symbol(&key, dir.path()).unwrap(), AuditOutcome::Complete);
    }

    #[test]
    fn test_empty_series_short_circuits() {
        let dir = tempdir().unwrap();
        let key = sample_key();
        write_series(&key, dir.path(), &[]);

        assert_eq!(audit_symbol(&key, dir.path()).unwrap(), AuditOutcome::Complete);
    }

    #[test]
    fn test_consecutive_gaps_condense_into_one_range() {
        let dir = tempdir().unwrap();
        let key = sample_key();
        // 09:01-09:03 all missing
        write_series(&key, dir.path(), &[T9, T9 + 4 * MINUTE]);

        let AuditOutcome::Gaps(report) = audit_symbol(&key, dir.path()).unwrap() else {
            panic!("expected gaps");
        };
        assert_eq!(report.missing_count, 3);
        assert_eq!(
            report.missing_ranges,
            vec![(T9 + MINUTE, T9 + 3 * MINUTE)]
        );
    }

    #[test]
    fn test_unknown_interval_is_an_error() {
        let dir = tempdir().unwrap();
        let key = SymbolKey::new(InstrumentType::Spot, "BTCUSDT", "9m");
        write_series(&key, dir.path(), &[T9]);

        assert!(matches!(
            audit_symbol(&key, dir.path()),
            Err(AuditError::Record(_))
        ));
    }

    #[test]
    fn test_condense_splits_disjoint_runs() {
        let missing = vec![0, 60_000, 300_000];
        assert_eq!(
            condense(&missing, 60_000),
            vec![(0, 60_000), (300_000, 300_000)]
        );
    }
}
