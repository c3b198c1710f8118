//! Symbol keys and archive references
//!
//! A `SymbolKey` identifies one time series and owns its local storage
//! layout; an `ArchiveRef` pins one month of that series and derives the
//! remote URLs and local paths for it. All derivations are pure functions
//! of the value, so re-running any stage for the same key always lands on
//! the same paths. The key travels with each task end-to-end; no stage
//! re-parses identity out of a path string.

use crate::{InstrumentType, YearMonth};
use std::path::{Path, PathBuf};

/// Identifies one k-line time series
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolKey {
    pub instrument: InstrumentType,
    pub symbol: String,
    pub interval: String,
}

impl SymbolKey {
    pub fn new(instrument: InstrumentType, symbol: &str, interval: &str) -> Self {
        Self {
            instrument,
            symbol: symbol.to_uppercase(),
            interval: interval.to_string(),
        }
    }

    /// `<data-root>/<instrument>/<symbol>`
    pub fn symbol_dir(&self, data_root: &Path) -> PathBuf {
        data_root
            .join(self.instrument.dir_name())
            .join(&self.symbol)
    }

    /// Directory holding downloaded archives and checksum files
    pub fn zip_dir(&self, data_root: &Path) -> PathBuf {
        self.symbol_dir(data_root).join("zip")
    }

    /// Directory holding extracted per-month CSV files
    pub fn csv_dir(&self, data_root: &Path) -> PathBuf {
        self.symbol_dir(data_root).join("csv")
    }

    /// The merged per-symbol series file
    pub fn merged_csv_path(&self, data_root: &Path) -> PathBuf {
        self.symbol_dir(data_root)
            .join(format!("{}.csv", self.symbol))
    }
}

/// One month of one series: the unit of fetch, verify and extract work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRef {
    pub key: SymbolKey,
    pub month: YearMonth,
}

impl ArchiveRef {
    pub fn new(key: SymbolKey, month: YearMonth) -> Self {
        Self { key, month }
    }

    /// `<symbol>-<interval>-<YYYY-MM>` stem shared by the remote object and
    /// every local file derived from it
    pub fn file_stem(&self) -> String {
        format!("{}-{}-{}", self.key.symbol, self.key.interval, self.month)
    }

    /// Remote archive URL under the given Vision data base
    pub fn archive_url(&self, base_url: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}.zip",
            base_url.trim_end_matches('/'),
            self.key.instrument.remote_base(),
            self.key.symbol,
            self.key.interval,
            self.file_stem()
        )
    }

    /// Remote checksum URL (archive URL with `.CHECKSUM` appended)
    pub fn checksum_url(&self, base_url: &str) -> String {
        format!("{}.CHECKSUM", self.archive_url(base_url))
    }

    /// Local archive path
    pub fn zip_path(&self, data_root: &Path) -> PathBuf {
        self.key
            .zip_dir(data_root)
            .join(format!("{}.zip", self.file_stem()))
    }

    /// Local checksum sibling of the archive
    pub fn checksum_path(&self, data_root: &Path) -> PathBuf {
        self.key
            .zip_dir(data_root)
            .join(format!("{}.zip.CHECKSUM", self.file_stem()))
    }

    /// Name of the single CSV member inside the archive
    pub fn csv_member_name(&self) -> String {
        format!("{}.csv", self.file_stem())
    }

    /// Local path of the extracted member
    pub fn csv_path(&self, data_root: &Path) -> PathBuf {
        self.key.csv_dir(data_root).join(self.csv_member_name())
    }
}
