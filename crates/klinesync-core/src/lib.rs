//! Core domain types for the klinesync ingestion pipeline
//!
//! Everything in this crate is pure: instrument/market selection, the
//! year-month calendar grid, symbol keys with their deterministic local
//! storage layout, and the raw/normalized k-line row schemas. No I/O
//! happens here; the pipeline crate drives these types against the
//! network and the filesystem.

pub mod archive;
pub mod calendar;
pub mod instrument;
pub mod records;

// Re-export commonly used types
pub use archive::{ArchiveRef, SymbolKey};
pub use calendar::{CalendarError, MonthRange, YearMonth};
pub use instrument::{InstrumentType, ParseInstrumentError};
pub use records::{interval_ms, NormalizedKline, RawKline, RecordError, OPEN_TIME_FORMAT};
