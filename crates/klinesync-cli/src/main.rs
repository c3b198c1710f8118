//! klinesync command-line interface
//!
//! One subcommand per pipeline stage plus `run` for the whole chain. Stages
//! hand work to each other only through the data root, so any stage can be
//! re-invoked on its own against whatever state the previous stage left
//! behind. A stage exits 0 even when individual items failed (those live in
//! the ledgers); only stage-fatal conditions exit non-zero.

use clap::{Parser, Subcommand};
use klinesync_config::{CliConfigMerge, Settings};
use klinesync_core::{InstrumentType, SymbolKey, YearMonth};
use klinesync_pipeline::{
    audit_symbols, catalog, extract_archives, ledger, normalize_symbols, store, verify_archives,
    ExtractPolicy, Fetcher, Ledger,
};
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(
    name = "klinesync",
    about = "Mirror Binance Vision monthly k-line archives into per-symbol series",
    long_about = "
Mirrors monthly k-line (candle) archives from data.binance.vision into a
local directory tree, verifies them against their published SHA-256
checksums, extracts them, and merges each symbol into one deduplicated,
gap-audited CSV series.

Every stage is idempotent: re-running skips work whose output already
exists, so an interrupted run can simply be started again.

Examples:
  klinesync --instrument um --symbol BTCUSDT fetch
  klinesync verify
  klinesync run
",
    version
)]
struct Cli {
    /// Configuration file (TOML); defaults and environment still apply
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data root directory
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    /// Restrict the run to one instrument type (spot, cm, um)
    #[arg(long, global = true)]
    instrument: Option<InstrumentType>,

    /// Restrict the run to specific symbols (repeatable)
    #[arg(long = "symbol", global = true)]
    symbols: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the symbols published for each configured instrument type
    Symbols,
    /// Download monthly archives and their checksum files
    Fetch,
    /// Verify downloaded archives against their recorded digests
    Verify,
    /// Extract archives into per-month CSV files
    Extract,
    /// Merge per-month files into one deduplicated, ordered series per symbol
    Normalize,
    /// Report missing candles in each normalized series
    Audit,
    /// Run fetch, verify, extract, normalize and audit in order
    Run,
}

impl CliConfigMerge for Cli {
    fn merge_into_config(&self, config: &mut Settings) {
        if let Some(root) = &self.data_root {
            config.data.data_root = root.clone();
        }
        if let Some(instrument) = self.instrument {
            config.data.instrument_types = vec![instrument];
        }
        if !self.symbols.is_empty() {
            config.data.symbols = self.symbols.clone();
        }
    }
}

/// Conditions that abort a stage
#[derive(Debug, Error)]
enum StageError {
    #[error("storage root is not writable: {0}")]
    Storage(std::io::Error),

    #[error("no instrument type produced a symbol listing")]
    CatalogUnavailable,

    #[error("invalid start month in configuration: {0}")]
    Config(#[from] klinesync_core::CalendarError),

    #[error("ledger write failed: {0}")]
    Ledger(std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&settings);
    init_worker_pool(&settings);

    match run(&cli, &settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(event_type = "stage_fatal", error = %e, "Stage aborted");
            ExitCode::FAILURE
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings, klinesync_config::ConfigError> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from_file(path)?,
        None => Settings::load()?,
    };
    Ok(settings.merge_cli_args(cli))
}

fn init_tracing(settings: &Settings) {
    let default_level = if settings.app.is_debug() {
        "debug"
    } else {
        settings.app.log_level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn init_worker_pool(settings: &Settings) {
    let threads = settings.app.worker_threads();
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
    {
        warn!(event_type = "pool_init_failed", error = %e, "Worker pool already initialized");
    }
}

async fn run(cli: &Cli, settings: &Settings) -> Result<(), StageError> {
    store::ensure_writable(&settings.data.data_root).map_err(StageError::Storage)?;

    match cli.command {
        Command::Symbols => cmd_symbols(settings).await,
        Command::Fetch => cmd_fetch(settings).await,
        Command::Verify => cmd_verify(settings),
        Command::Extract => cmd_extract(settings),
        Command::Normalize => cmd_normalize(settings),
        Command::Audit => cmd_audit(settings),
        Command::Run => {
            cmd_fetch(settings).await?;
            cmd_verify(settings)?;
            cmd_extract(settings)?;
            cmd_normalize(settings)?;
            cmd_audit(settings)
        }
    }
}

/// Archive grid from the configured start month through the current month
fn month_span(settings: &Settings) -> Result<(YearMonth, YearMonth), StageError> {
    let start = settings.data.start()?;
    let end = YearMonth::of(chrono::Utc::now().date_naive());
    Ok((start, end))
}

/// Keys for symbols already present under the data root
fn local_keys(
    settings: &Settings,
    instrument: InstrumentType,
) -> Result<Vec<SymbolKey>, StageError> {
    let symbols =
        store::local_symbols(&settings.data.data_root, instrument).map_err(StageError::Storage)?;
    let mut keys = Vec::new();
    for symbol in &symbols {
        for interval in &settings.data.intervals {
            keys.push(SymbolKey::new(instrument, symbol, interval));
        }
    }
    Ok(keys)
}

async fn cmd_symbols(settings: &Settings) -> Result<(), StageError> {
    let client = reqwest::Client::new();
    let mut any_listed = false;
    for &instrument in &settings.data.instrument_types {
        match catalog::list_symbols(&client, &settings.data, instrument).await {
            Ok(symbols) => {
                any_listed = true;
                for symbol in symbols {
                    println!("{instrument} {symbol}");
                }
            }
            Err(e) => warn!(
                event_type = "catalog_unavailable",
                instrument = %instrument,
                error = %e,
                "Skipping instrument type"
            ),
        }
    }
    if any_listed {
        Ok(())
    } else {
        Err(StageError::CatalogUnavailable)
    }
}

async fn cmd_fetch(settings: &Settings) -> Result<(), StageError> {
    let (start, end) = month_span(settings)?;
    let client = reqwest::Client::new();

    let mut refs = Vec::new();
    let mut any_listed = false;
    for &instrument in &settings.data.instrument_types {
        match catalog::list_symbols(&client, &settings.data, instrument).await {
            Ok(symbols) => {
                any_listed = true;
                refs.extend(catalog::enumerate_archives(
                    instrument,
                    &symbols,
                    &settings.data.intervals,
                    start,
                    end,
                ));
            }
            Err(e) => warn!(
                event_type = "catalog_unavailable",
                instrument = %instrument,
                error = %e,
                "Skipping instrument type"
            ),
        }
    }
    if !any_listed {
        return Err(StageError::CatalogUnavailable);
    }

    let fetcher = Fetcher::new(&settings.data);
    let report = fetcher.fetch_archives(&settings.data, &refs).await;

    if !report.failed.is_empty() {
        let mut out = Ledger::open(&settings.data.data_root, ledger::FETCH_REPORT)
            .map_err(StageError::Ledger)?;
        for (url, detail) in &report.failed {
            out.append(&format!("{} fetch failed {url} {detail}", ledger::stamp()))
                .map_err(StageError::Ledger)?;
        }
        out.flush().map_err(StageError::Ledger)?;
    }

    println!(
        "fetch: {} saved, {} skipped, {} absent, {} failed",
        report.saved,
        report.skipped,
        report.not_found,
        report.failed.len()
    );
    Ok(())
}

/// Work set for verify/extract: every enumerated archive whose ZIP exists
fn archives_on_disk(settings: &Settings) -> Result<Vec<klinesync_core::ArchiveRef>, StageError> {
    let (start, end) = month_span(settings)?;
    let mut refs = Vec::new();
    for &instrument in &settings.data.instrument_types {
        for key in local_keys(settings, instrument)? {
            for month in YearMonth::range_inclusive(start, end) {
                refs.push(klinesync_core::ArchiveRef::new(key.clone(), month));
            }
        }
    }
    Ok(store::existing_archives(refs, &settings.data.data_root))
}

fn cmd_verify(settings: &Settings) -> Result<(), StageError> {
    let archives = archives_on_disk(settings)?;
    let results = verify_archives(&archives, &settings.data.data_root);

    let mut out = Ledger::open(&settings.data.data_root, ledger::CHECKSUM_REPORT)
        .map_err(StageError::Ledger)?;
    let mut flagged = 0;
    for result in &results {
        if !result.verified {
            flagged += 1;
            out.append(&result.ledger_line()).map_err(StageError::Ledger)?;
        }
    }
    out.flush().map_err(StageError::Ledger)?;

    println!(
        "verify: {} archives, {} verified, {} flagged",
        results.len(),
        results.len() - flagged,
        flagged
    );
    Ok(())
}

fn cmd_extract(settings: &Settings) -> Result<(), StageError> {
    let archives = archives_on_disk(settings)?;
    let policy = ExtractPolicy {
        strict_verification: settings.data.strict_verification,
        delete_archives: settings.data.delete_archives,
    };
    let report = extract_archives(&archives, &settings.data.data_root, policy);

    if !report.failed.is_empty() {
        let mut out = Ledger::open(&settings.data.data_root, ledger::CHECKSUM_REPORT)
            .map_err(StageError::Ledger)?;
        for line in report.ledger_lines() {
            out.append(&line).map_err(StageError::Ledger)?;
        }
        out.flush().map_err(StageError::Ledger)?;
    }

    println!(
        "extract: {} extracted, {} existing, {} gated, {} corrupt",
        report.extracted,
        report.existing,
        report.skipped_unverified,
        report.failed.len()
    );
    Ok(())
}

fn cmd_normalize(settings: &Settings) -> Result<(), StageError> {
    let mut keys = Vec::new();
    for &instrument in &settings.data.instrument_types {
        keys.extend(local_keys(settings, instrument)?);
    }
    let report = normalize_symbols(&keys, &settings.data.data_root);

    if !report.failed.is_empty() {
        let mut out = Ledger::open(&settings.data.data_root, ledger::CHECKSUM_REPORT)
            .map_err(StageError::Ledger)?;
        for line in report.ledger_lines() {
            out.append(&line).map_err(StageError::Ledger)?;
        }
        out.flush().map_err(StageError::Ledger)?;
    }

    println!(
        "normalize: {} series written ({} records), {} empty, {} failed",
        report.written,
        report.records,
        report.empty,
        report.failed.len()
    );
    Ok(())
}

fn cmd_audit(settings: &Settings) -> Result<(), StageError> {
    let mut keys = Vec::new();
    for &instrument in &settings.data.instrument_types {
        keys.extend(local_keys(settings, instrument)?);
    }
    let keys = store::keys_with_merged_series(keys, &settings.data.data_root);
    let report = audit_symbols(&keys, &settings.data.data_root);

    if !report.gapped.is_empty() {
        let mut out = Ledger::open(&settings.data.data_root, ledger::GAP_REPORT)
            .map_err(StageError::Ledger)?;
        for gaps in &report.gapped {
            for line in gaps.ledger_lines() {
                out.append(&line).map_err(StageError::Ledger)?;
            }
        }
        out.flush().map_err(StageError::Ledger)?;
    }

    info!(
        event_type = "run_complete",
        complete = report.complete,
        gapped = report.gapped.len(),
        "Audit results recorded"
    );
    println!(
        "audit: {} complete, {} with gaps, {} failed",
        report.complete,
        report.gapped.len(),
        report.failed.len()
    );
    Ok(())
}
