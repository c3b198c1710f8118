//! K-line row schemas
//!
//! `RawKline` mirrors the 12-column row layout published in Vision monthly
//! archives; `NormalizedKline` is the canonical merged-output row. Price
//! and volume columns stay in the exchange's string form so the merged
//! output preserves the published precision instead of round-tripping
//! through floats.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Calendar form used for `candle_open_time` in merged output
pub const OPEN_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Record-level conversion errors
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("open time {millis} ms is outside the representable range")]
    TimestampOutOfRange { millis: i64 },

    #[error("unparseable candle open time: {value}")]
    UnparseableOpenTime { value: String },

    #[error("unknown interval: {interval}")]
    UnknownInterval { interval: String },
}

/// One row as published in a Vision k-line archive
///
/// Column order is fixed by the exchange: open time (epoch ms), open, high,
/// low, close, volume, close time (epoch ms), quote asset volume, trade
/// count, taker buy base volume, taker buy quote volume, and an unused
/// trailing field.
#[derive(Debug, Clone, Deserialize)]
pub struct RawKline(
    pub i64,    // open time
    pub String, // open
    pub String, // high
    pub String, // low
    pub String, // close
    pub String, // volume
    pub i64,    // close time
    pub String, // quote asset volume
    pub u64,    // trade count
    pub String, // taker buy base volume
    pub String, // taker buy quote volume
    pub String, // unused
);

impl RawKline {
    /// The dedup/sort key
    pub fn open_time(&self) -> i64 {
        self.0
    }
}

/// Canonical merged-output row, one per unique open time per series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedKline {
    pub candle_open_time: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub quote_volume: String,
    pub trade_count: u64,
    pub taker_buy_base_volume: String,
    pub taker_buy_quote_volume: String,
}

impl NormalizedKline {
    /// Project a raw archive row onto the canonical schema
    pub fn from_raw(raw: RawKline) -> Result<Self, RecordError> {
        let open_time = DateTime::from_timestamp_millis(raw.0)
            .ok_or(RecordError::TimestampOutOfRange { millis: raw.0 })?;
        Ok(Self {
            candle_open_time: open_time.format(OPEN_TIME_FORMAT).to_string(),
            open: raw.1,
            high: raw.2,
            low: raw.3,
            close: raw.4,
            volume: raw.5,
            quote_volume: raw.7,
            trade_count: raw.8,
            taker_buy_base_volume: raw.9,
            taker_buy_quote_volume: raw.10,
        })
    }

    /// Open time in epoch milliseconds, parsed back from the calendar form
    pub fn open_time_ms(&self) -> Result<i64, RecordError> {
        let naive = NaiveDateTime::parse_from_str(&self.candle_open_time, OPEN_TIME_FORMAT)
            .map_err(|_| RecordError::UnparseableOpenTime {
                value: self.candle_open_time.clone(),
            })?;
        Ok(naive.and_utc().timestamp_millis())
    }
}

/// Milliseconds spanned by one candle of the given interval code
pub fn interval_ms(interval: &str) -> Result<i64, RecordError> {
    let ms = match interval {
        "1s" => 1_000,
        "1m" => 60_000,
        "3m" => 180_000,
        "5m" => 300_000,
        "15m" => 900_000,
        "30m" => 1_800_000,
        "1h" => 3_600_000,
        "2h" => 7_200_000,
        "4h" => 14_400_000,
        "6h" => 21_600_000,
        "8h" => 28_800_000,
        "12h" => 43_200_000,
        "1d" => 86_400_000,
        _ => {
            return Err(RecordError::UnknownInterval {
                interval: interval.to_string(),
            })
        }
    };
    Ok(ms)
}
