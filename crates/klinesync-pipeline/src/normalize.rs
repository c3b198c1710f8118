//! Per-symbol merge of extracted month files
//!
//! All month files for a key are folded into an ordered map keyed by raw
//! open time: insertion order makes the last occurrence win (later files
//! override republished months), map order gives the ascending sort. The
//! merged file is rewritten wholesale on every run; uniqueness and
//! ordering are enforced here, never assumed from the inputs.

use klinesync_core::{NormalizedKline, RawKline, SymbolKey};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ledger::stamp;
use crate::store::part_path;

/// Normalization errors
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// Column count or order in a source file does not match the canonical
    /// 12-column schema
    #[error("schema mismatch in {file}: {detail}")]
    Schema { file: PathBuf, detail: String },

    #[error("io error for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("write failed for {path}: {source}")]
    Write { path: PathBuf, source: csv::Error },

    #[error(transparent)]
    Record(#[from] klinesync_core::RecordError),
}

/// Success states of one normalization
#[derive(Debug, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// Merged series written, replacing any prior output
    Written { path: PathBuf, records: usize },
    /// No extracted month files exist for this key
    NoInputData,
}

/// Aggregate result of one normalize stage run
#[derive(Debug, Default)]
pub struct NormalizeReport {
    pub written: usize,
    pub records: usize,
    pub empty: usize,
    pub failed: Vec<(SymbolKey, String)>,
}

impl NormalizeReport {
    /// `checksum-report` lines for symbols that failed normalization
    pub fn ledger_lines(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|(key, detail)| {
                format!(
                    "{} normalize {} {} {} - schema-error {detail}",
                    stamp(),
                    key.instrument,
                    key.symbol,
                    key.interval
                )
            })
            .collect()
    }
}

/// Merge every extracted month file for `key` into one ordered series
pub fn normalize_symbol(
    key: &SymbolKey,
    data_root: &Path,
) -> Result<NormalizeOutcome, NormalizeError> {
    let mut inputs = month_files(key, data_root)?;
    if inputs.is_empty() {
        debug!(
            event_type = "normalize_empty",
            symbol = %key.symbol,
            interval = %key.interval,
            "No extracted month files"
        );
        return Ok(NormalizeOutcome::NoInputData);
    }
    // Zero-padded month stems make lexicographic order chronological, so
    // later months override earlier ones on duplicate open times.
    inputs.sort();

    let mut by_open_time: BTreeMap<i64, NormalizedKline> = BTreeMap::new();
    for path in &inputs {
        merge_file(path, &mut by_open_time)?;
    }

    let merged_path = key.merged_csv_path(data_root);
    if let Some(parent) = merged_path.parent() {
        fs::create_dir_all(parent).map_err(|source| NormalizeError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let staging = part_path(&merged_path);
    let mut writer = csv::Writer::from_path(&staging).map_err(|source| NormalizeError::Write {
        path: staging.clone(),
        source,
    })?;
    for record in by_open_time.values() {
        writer
            .serialize(record)
            .map_err(|source| NormalizeError::Write {
                path: staging.clone(),
                source,
            })?;
    }
    writer.flush().map_err(|source| NormalizeError::Io {
        path: staging.clone(),
        source,
    })?;
    drop(writer);
    fs::rename(&staging, &merged_path).map_err(|source| NormalizeError::Io {
        path: merged_path.clone(),
        source,
    })?;

    info!(
        event_type = "normalized",
        symbol = %key.symbol,
        interval = %key.interval,
        files = inputs.len(),
        records = by_open_time.len(),
        "Wrote merged series"
    );
    Ok(NormalizeOutcome::Written {
        path: merged_path,
        records: by_open_time.len(),
    })
}

/// Extracted month files belonging to `key`
fn month_files(key: &SymbolKey, data_root: &Path) -> Result<Vec<PathBuf>, NormalizeError> {
    let csv_dir = key.csv_dir(data_root);
    let mut files = Vec::new();
    let entries = match fs::read_dir(&csv_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(source) => {
            return Err(NormalizeError::Io {
                path: csv_dir,
                source,
            })
        }
    };
    let prefix = format!("{}-{}-", key.symbol, key.interval);
    for entry in entries {
        let entry = entry.map_err(|source| NormalizeError::Io {
            path: csv_dir.clone(),
            source,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && name.ends_with(".csv") {
            files.push(entry.path());
        }
    }
    Ok(files)
}

fn merge_file(
    path: &Path,
    acc: &mut BTreeMap<i64, NormalizedKline>,
) -> Result<(), NormalizeError> {
    let file = fs::File::open(path).map_err(|source| NormalizeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(file);

    for (index, result) in reader.deserialize::<RawKline>().enumerate() {
        let raw = match result {
            Ok(raw) => raw,
            // Newer archives ship a header row whose first field is not a
            // timestamp; drop it and keep going
            Err(_) if index == 0 => continue,
            Err(e) => {
                return Err(NormalizeError::Schema {
                    file: path.to_path_buf(),
                    detail: e.to_string(),
                })
            }
        };
        acc.insert(raw.open_time(), NormalizedKline::from_raw(raw)?);
    }
    Ok(())
}

/// Normalize a set of keys in parallel
///
/// A schema error is recorded per symbol; the run continues with the rest.
pub fn normalize_symbols(keys: &[SymbolKey], data_root: &Path) -> NormalizeReport {
    let results: Vec<(&SymbolKey, Result<NormalizeOutcome, NormalizeError>)> = keys
        .par_iter()
        .map(|key| (key, normalize_symbol(key, data_root)))
        .collect();

    let mut report = NormalizeReport::default();
    for (key, result) in results {
        match result {
            Ok(NormalizeOutcome::Written { records, .. }) => {
                report.written += 1;
                report.records += records;
            }
            Ok(NormalizeOutcome::NoInputData) => report.empty += 1,
            Err(e) => {
                warn!(
                    event_type = "normalize_failed",
                    symbol = %key.symbol,
                    interval = %key.interval,
                    error = %e,
                    "Normalization failed"
                );
                report.failed.push((key.clone(), e.to_string()));
            }
        }
    }

    info!(
        event_type = "normalize_complete",
        written = report.written,
        records = report.records,
        empty = report.empty,
        failed = report.failed.len(),
        "Normalize stage finished"
    );
    report
}
