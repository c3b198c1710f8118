//! Remote endpoints, storage layout and pipeline policy

use klinesync_core::{CalendarError, InstrumentType, YearMonth};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Data source and pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Base URL for Vision monthly archives
    pub base_url: String,

    /// S3 listing endpoint used for symbol discovery
    pub listing_url: String,

    /// Instrument types to process
    pub instrument_types: Vec<InstrumentType>,

    /// Explicit symbol list; empty means discover from the listing endpoint
    pub symbols: Vec<String>,

    /// Candle intervals to mirror
    pub intervals: Vec<String>,

    /// First archive month (`YYYY-MM`)
    pub start_month: String,

    /// Root directory for downloaded, extracted and merged data
    pub data_root: PathBuf,

    /// Download pool width; unset means proportional to available parallelism
    pub max_concurrent_downloads: Option<usize>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Number of retry attempts after a transient download failure
    pub retry_attempts: usize,

    /// Base delay between retry attempts in milliseconds
    pub retry_delay_ms: u64,

    /// Skip downloads whose destination file already exists
    pub skip_existing: bool,

    /// Gate extraction on a passing checksum verification
    pub strict_verification: bool,

    /// Delete archives after their content is extracted and readable
    pub delete_archives: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data.binance.vision/data/".to_string(),
            listing_url: "https://s3-ap-northeast-1.amazonaws.com/data.binance.vision".to_string(),
            instrument_types: InstrumentType::all().to_vec(),
            symbols: Vec::new(),
            intervals: vec!["1m".to_string()],
            start_month: "2017-08".to_string(),
            data_root: PathBuf::from("./data"),
            max_concurrent_downloads: None,
            request_timeout_secs: 30,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            skip_existing: true,
            strict_verification: false,
            delete_archives: false,
        }
    }
}

impl DataConfig {
    /// Listing endpoint for one instrument type (S3 prefix query)
    pub fn listing_url_for(&self, instrument: InstrumentType) -> String {
        format!(
            "{}?delimiter=/&prefix=data/{}/",
            self.listing_url.trim_end_matches('/'),
            instrument.remote_base()
        )
    }

    /// Parsed first archive month
    pub fn start(&self) -> Result<YearMonth, CalendarError> {
        self.start_month.parse()
    }

    /// Download pool width, auto-sized from available parallelism when unset
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrent_downloads
            .unwrap_or_else(|| num_cpus::get().saturating_mul(2))
            .max(1)
    }
}
