//! Binance Vision market selection
//!
//! Each instrument type maps to a distinct remote base path on the Vision
//! bucket and a distinct subdirectory under the local data root.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The market an archive belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    /// Spot markets
    Spot,
    /// Coin-margined futures (inverse contracts, e.g. BTCUSD_PERP)
    Cm,
    /// USD-margined futures (USDT/USDC contracts, e.g. BTCUSDT)
    Um,
}

impl InstrumentType {
    /// Remote path segment under the Vision data root
    pub fn remote_base(&self) -> &'static str {
        match self {
            InstrumentType::Spot => "spot/monthly/klines",
            InstrumentType::Cm => "futures/cm/monthly/klines",
            InstrumentType::Um => "futures/um/monthly/klines",
        }
    }

    /// Local subdirectory under the data root
    pub fn dir_name(&self) -> &'static str {
        match self {
            InstrumentType::Spot => "spot",
            InstrumentType::Cm => "cm",
            InstrumentType::Um => "um",
        }
    }

    /// Every supported instrument type
    pub fn all() -> [InstrumentType; 3] {
        [InstrumentType::Spot, InstrumentType::Cm, InstrumentType::Um]
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Error returned when parsing an unknown instrument type
#[derive(Debug, Error, PartialEq)]
#[error("unknown instrument type: {0} (expected spot, cm or um)")]
pub struct ParseInstrumentError(String);

impl FromStr for InstrumentType {
    type Err = ParseInstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(InstrumentType::Spot),
            "cm" | "cm_future" => Ok(InstrumentType::Cm),
            "um" | "um_future" => Ok(InstrumentType::Um),
            _ => Err(ParseInstrumentError(s.to_string())),
        }
    }
}
