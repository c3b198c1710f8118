//! Append-only run ledgers
//!
//! Ledgers live at the data root, one record per line. Workers never write
//! them directly: each stage collects worker results first, then a single
//! writer appends, so lines are never interleaved.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Failed downloads
pub const FETCH_REPORT: &str = "fetch-report";
/// Verification, corruption and schema outcomes
pub const CHECKSUM_REPORT: &str = "checksum-report";
/// Missing-candle ranges
pub const GAP_REPORT: &str = "gap-report";

/// UTC timestamp prefix for ledger lines
pub fn stamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// An append-only ledger file
pub struct Ledger {
    out: BufWriter<File>,
}

impl Ledger {
    /// Open (creating if absent) a ledger at the data root
    pub fn open(data_root: &Path, name: &str) -> io::Result<Self> {
        std::fs::create_dir_all(data_root)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_root.join(name))?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    /// Append one record line
    pub fn append(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out, "{line}")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_appends_accumulate_across_opens() {
        let dir = tempdir().unwrap();

        let mut ledger = Ledger::open(dir.path(), GAP_REPORT).unwrap();
        ledger.append("first").unwrap();
        ledger.flush().unwrap();
        drop(ledger);

        let mut ledger = Ledger::open(dir.path(), GAP_REPORT).unwrap();
        ledger.append("second").unwrap();
        ledger.flush().unwrap();

        let content = std::fs::read_to_string(dir.path().join(GAP_REPORT)).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_stamp_shape() {
        let stamp = stamp();
        assert_eq!(stamp.len(), 20);
        assert!(stamp.ends_with('Z'));
    }
}
