//! Local storage layout helpers
//!
//! Later stages rediscover their work set from the filesystem rather than
//! re-contacting the remote host: symbols come from the directory layout,
//! months from the deterministic path grid, so nothing is parsed back out
//! of file names.

use klinesync_core::{ArchiveRef, InstrumentType, SymbolKey};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Staging name for atomic writes: `<file>.part`, renamed into place
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Verify the data root exists and accepts writes
///
/// An unwritable root is stage-fatal; probing up front beats failing
/// thousands of workers later.
pub fn ensure_writable(data_root: &Path) -> io::Result<()> {
    fs::create_dir_all(data_root)?;
    let probe = data_root.join(".write-probe");
    fs::write(&probe, b"probe")?;
    fs::remove_file(&probe)?;
    Ok(())
}

/// Symbols that already have local state for an instrument type
pub fn local_symbols(data_root: &Path, instrument: InstrumentType) -> io::Result<Vec<String>> {
    let dir = data_root.join(instrument.dir_name());
    let mut symbols = Vec::new();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(symbols),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            symbols.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    symbols.sort();
    Ok(symbols)
}

/// Restrict an enumerated grid to archives actually present on disk
pub fn existing_archives(refs: Vec<ArchiveRef>, data_root: &Path) -> Vec<ArchiveRef> {
    refs.into_iter()
        .filter(|r| r.zip_path(data_root).exists())
        .collect()
}

/// Restrict a key set to series with a merged output file
pub fn keys_with_merged_series(keys: Vec<SymbolKey>, data_root: &Path) -> Vec<SymbolKey> {
    keys.into_iter()
        .filter(|k| k.merged_csv_path(data_root).exists())
        .collect()
}
