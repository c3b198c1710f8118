//! Ingestion pipeline stages
//!
//! A strict chain, each stage independently re-runnable against the
//! filesystem state left by the previous one:
//!
//! 1. `catalog` - symbol discovery and archive enumeration
//! 2. `fetch` - bounded concurrent download of archives and checksum files
//! 3. `checksum` - SHA-256 verification against the recorded digests
//! 4. `extract` - atomic extraction of the single CSV member per archive
//! 5. `normalize` - per-symbol merge into one deduplicated, ordered series
//! 6. `audit` - fixed-interval completeness check of each merged series
//!
//! Stages communicate only through the data root; per-item failures are
//! collected into reports and ledgers, never propagated as stage failures.

pub mod audit;
pub mod catalog;
pub mod checksum;
pub mod extract;
pub mod fetch;
pub mod ledger;
pub mod normalize;
pub mod store;

// Re-export commonly used types
pub use audit::{audit_symbol, audit_symbols, AuditError, AuditOutcome, AuditReport, GapReport};
pub use catalog::{enumerate_archives, list_symbols, parse_symbol_listing, CatalogError};
pub use checksum::{
    compute_sha256, parse_checksum_file, verify_archive, verify_archives, ChecksumError,
    IntegrityResult, VerifyReason,
};
pub use extract::{
    extract_archive, extract_archives, ExtractError, ExtractOutcome, ExtractPolicy, ExtractReport,
};
pub use fetch::{FetchOutcome, FetchReport, Fetcher};
pub use ledger::Ledger;
pub use normalize::{
    normalize_symbol, normalize_symbols, NormalizeError, NormalizeOutcome, NormalizeReport,
};
