//! Symbol discovery and archive enumeration
//!
//! The Vision bucket exposes an S3-style listing endpoint. Symbol names are
//! the path segment between the `/klines/` prefix and the closing
//! `/</Prefix>` tag, so a plain delimiter scan is enough; the listing is
//! otherwise treated as opaque text.

use klinesync_config::DataConfig;
use klinesync_core::{ArchiveRef, InstrumentType, SymbolKey, YearMonth};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that make symbol discovery impossible for an instrument type
///
/// These are the only fatal conditions in the pipeline besides an
/// unwritable data root; the caller decides whether to abort the stage or
/// skip the instrument type.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("listing request for {instrument} failed: {source}")]
    ListingUnreachable {
        instrument: InstrumentType,
        source: reqwest::Error,
    },

    #[error("listing for {instrument} returned HTTP {status}")]
    ListingRejected {
        instrument: InstrumentType,
        status: u16,
    },

    #[error("listing for {instrument} contained no symbols")]
    EmptyListing { instrument: InstrumentType },
}

/// Extract symbol names from a raw listing document
///
/// Returns a sorted, deduplicated set. An empty result on a non-empty
/// document means the document shape changed and must be treated as a
/// malformed listing by the caller.
pub fn parse_symbol_listing(listing: &str) -> Vec<String> {
    let mut symbols = Vec::new();
    for chunk in listing.split("/klines/").skip(1) {
        if let Some(end) = chunk.find("/</Prefix>") {
            let symbol = &chunk[..end];
            if !symbol.is_empty()
                && symbol
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                symbols.push(symbol.to_string());
            }
        }
    }
    symbols.sort();
    symbols.dedup();
    symbols
}

/// Discover the symbols published for one instrument type
///
/// A non-empty `symbols` list in the configuration pins the set and
/// short-circuits the remote listing entirely.
pub async fn list_symbols(
    client: &reqwest::Client,
    config: &DataConfig,
    instrument: InstrumentType,
) -> Result<Vec<String>, CatalogError> {
    if !config.symbols.is_empty() {
        let mut pinned: Vec<String> = config.symbols.iter().map(|s| s.to_uppercase()).collect();
        pinned.sort();
        pinned.dedup();
        debug!(
            event_type = "catalog_pinned",
            instrument = %instrument,
            count = pinned.len(),
            "Using configured symbol list"
        );
        return Ok(pinned);
    }

    let url = config.listing_url_for(instrument);
    let response = client
        .get(&url)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .send()
        .await
        .map_err(|source| CatalogError::ListingUnreachable { instrument, source })?;

    let status = response.status();
    if !status.is_success() {
        return Err(CatalogError::ListingRejected {
            instrument,
            status: status.as_u16(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|source| CatalogError::ListingUnreachable { instrument, source })?;

    let symbols = parse_symbol_listing(&body);
    if symbols.is_empty() {
        return Err(CatalogError::EmptyListing { instrument });
    }

    info!(
        event_type = "catalog_listed",
        instrument = %instrument,
        count = symbols.len(),
        "Discovered symbols"
    );
    Ok(symbols)
}

/// Cross-join symbols, intervals and calendar months into archive references
///
/// Deterministic given its inputs; `end` is supplied by the caller so the
/// grid does not depend on a hidden clock. No month before `start` is ever
/// emitted.
pub fn enumerate_archives(
    instrument: InstrumentType,
    symbols: &[String],
    intervals: &[String],
    start: YearMonth,
    end: YearMonth,
) -> Vec<ArchiveRef> {
    let mut refs = Vec::new();
    for symbol in symbols {
        for interval in intervals {
            let key = SymbolKey::new(instrument, symbol, interval);
            for month in YearMonth::range_inclusive(start, end) {
                refs.push(ArchiveRef::new(key.clone(), month));
            }
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING_SAMPLE: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
        <ListBucketResult><Name>data.binance.vision</Name>\
        <CommonPrefixes><Prefix>data/spot/monthly/klines/BTCUSDT/</Prefix></CommonPrefixes>\
        <CommonPrefixes><Prefix>data/spot/monthly/klines/ETHUSDT/</Prefix></CommonPrefixes>\
        <CommonPrefixes><Prefix>data/spot/monthly/klines/ADAUSDT/</Prefix></CommonPrefixes>\
        </ListBucketResult>";

    #[test]
    fn test_parse_symbol_listing() {
        let symbols = parse_symbol_listing(LISTING_SAMPLE);
        assert_eq!(symbols, vec!["ADAUSDT", "BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn test_parse_symbol_listing_dedups() {
        let doubled = format!("{LISTING_SAMPLE}{LISTING_SAMPLE}");
        let symbols = parse_symbol_listing(&doubled);
        assert_eq!(symbols.len(), 3);
    }

    #[test]
    fn test_parse_symbol_listing_empty_document() {
        assert!(parse_symbol_listing("").is_empty());
        assert!(parse_symbol_listing("<Error>AccessDenied</Error>").is_empty());
    }

    #[tokio::test]
    async fn test_pinned_symbols_skip_remote_listing() {
        // The listing endpoint is unreachable on purpose; a pinned symbol
        // list must be returned without any network activity.
        let config = DataConfig {
            symbols: vec!["ethusdt".to_string(), "btcusdt".to_string()],
            listing_url: "http://127.0.0.1:1".to_string(),
            ..DataConfig::default()
        };
        let client = reqwest::Client::new();

        let symbols = list_symbols(&client, &config, InstrumentType::Spot)
            .await
            .unwrap();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn test_enumerate_archives_grid() {
        let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        let intervals = vec!["1m".to_string()];
        let start: YearMonth = "2020-01".parse().unwrap();
        let end: YearMonth = "2020-04".parse().unwrap();

        let refs = enumerate_archives(InstrumentType::Spot, &symbols, &intervals, start, end);

        // 2 symbols x 1 interval x 4 months
        assert_eq!(refs.len(), 8);
        assert!(refs.iter().all(|r| r.month >= start && r.month <= end));
    }

    #[test]
    fn test_enumerate_archives_respects_lower_bound() {
        let symbols = vec!["BTCUSDT".to_string()];
        let intervals = vec!["1m".to_string()];
        let start: YearMonth = "2019-11".parse().unwrap();
        let end: YearMonth = "2020-02".parse().unwrap();

        let refs = enumerate_archives(InstrumentType::Um, &symbols, &intervals, start, end);
        let months: Vec<String> = refs.iter().map(|r| r.month.to_string()).collect();
        assert_eq!(months, vec!["2019-11", "2019-12", "2020-01", "2020-02"]);
    }

    #[test]
    fn test_enumerate_archives_is_deterministic() {
        let symbols = vec!["BTCUSDT".to_string()];
        let intervals = vec!["1m".to_string(), "5m".to_string()];
        let start: YearMonth = "2021-01".parse().unwrap();
        let end: YearMonth = "2021-03".parse().unwrap();

        let a = enumerate_archives(InstrumentType::Spot, &symbols, &intervals, start, end);
        let b = enumerate_archives(InstrumentType::Spot, &symbols, &intervals, start, end);
        assert_eq!(a, b);
    }
}
