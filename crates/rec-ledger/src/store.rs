//! Ledger backing stores
//!
//! Stores are driven by the ledger's writer thread only, so they take
//! `&mut self` and need no internal locking.

use crate::error::LedgerError;
use crate::record::{FailureRecord, LedgerEntry};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Durable (or not) home for ledger entries
pub trait LedgerStore: Send + 'static {
    /// Append one entry
    ///
    /// # Errors
    /// Returns [`LedgerError`] if the entry could not be written.
    fn append(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    /// Push buffered writes down to the medium
    ///
    /// # Errors
    /// Returns [`LedgerError`] if buffered data could not be written.
    fn sync(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }

    /// Read back every entry, oldest first
    ///
    /// # Errors
    /// Returns [`LedgerError`] if the medium cannot be read.
    fn load(&mut self) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Replace the contents with exactly `records`
    ///
    /// # Errors
    /// Returns [`LedgerError`] if the rewrite failed; the previous contents
    /// must then be left intact.
    fn compact(&mut self, records: &[FailureRecord]) -> Result<(), LedgerError>;
}

/// Best-effort in-process store
///
/// Clones share the same entries, which lets tests inspect what the writer
/// thread persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<Vec<LedgerEntry>>>,
}

impl MemoryStore {
    /// Empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything persisted so far
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().clone()
    }
}

impl LedgerStore for MemoryStore {
    fn append(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    fn load(&mut self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.entries())
    }

    fn compact(&mut self, records: &[FailureRecord]) -> Result<(), LedgerError> {
        *self.entries.lock() = records.iter().cloned().map(LedgerEntry::Failure).collect();
        Ok(())
    }
}

/// Append-only JSON Lines file
///
/// Failure lines carry the `FailureRecord` fields verbatim plus
/// `"entry":"failure"`; resolutions are separate `"entry":"resolved"` lines.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonlStore {
    /// Store backed by `path` (created on first write)
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    /// Backing file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, LedgerError> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| LedgerError::io(&self.path, e))?;
            if end_line(&mut file).map_err(|e| LedgerError::io(&self.path, e))? {
                tracing::warn!(path = %self.path.display(), "terminated torn ledger tail");
            }
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| LedgerError::Store("writer unavailable".into()))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".compact");
        self.path.with_file_name(name)
    }
}

/// Append a newline if the file ends mid-line, so the next entry starts on
/// a line of its own. Returns whether one was written.
fn end_line(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(false);
    }
    file.write_all(b"\n")?;
    Ok(true)
}

impl LedgerStore for JsonlStore {
    fn append(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let path = self.path.clone();
        self.writer()?
            .write_all(&line)
            .map_err(|e| LedgerError::io(path, e))
    }

    fn sync(&mut self) -> Result<(), LedgerError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(|e| LedgerError::io(&self.path, e))?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LedgerError::io(&self.path, e)),
        };
        let mut entries = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| LedgerError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    // a torn final write must not make the whole ledger unreadable
                    tracing::warn!(
                        path = %self.path.display(),
                        line = number + 1,
                        error = %e,
                        "skipping malformed ledger line"
                    );
                }
            }
        }
        Ok(entries)
    }

    fn compact(&mut self, records: &[FailureRecord]) -> Result<(), LedgerError> {
        self.sync()?;
        let temp = self.temp_path();
        {
            let file = File::create(&temp).map_err(|e| LedgerError::io(&temp, e))?;
            let mut out = BufWriter::new(file);
            for record in records {
                serde_json::to_writer(&mut out, &LedgerEntry::Failure(record.clone()))?;
                out.write_all(b"\n").map_err(|e| LedgerError::io(&temp, e))?;
            }
            let file = out
                .into_inner()
                .map_err(|e| LedgerError::io(&temp, e.into_error()))?;
            file.sync_all().map_err(|e| LedgerError::io(&temp, e))?;
        }
        self.writer = None;
        fs::rename(&temp, &self.path).map_err(|e| LedgerError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rec_policy::ErrorKind;
    use std::io::Write as _;

    #[test]
    fn jsonl_round_trip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlStore::new(dir.path().join("nested/ledger.jsonl"));
        assert!(store.load().unwrap().is_empty());

        let record = FailureRecord::new("op", ErrorKind::Network, "reset", 0);
        store.append(&LedgerEntry::Failure(record.clone())).unwrap();
        store.sync().unwrap();

        let entries = store.load().unwrap();
        assert_eq!(entries, vec![LedgerEntry::Failure(record)]);
    }

    #[test]
    fn jsonl_skips_torn_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let mut store = JsonlStore::new(&path);
        store
            .append(&LedgerEntry::Failure(FailureRecord::new(
                "op",
                ErrorKind::Timeout,
                "slow",
                0,
            )))
            .unwrap();
        store.sync().unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"entry\":\"failure\",\"timest").unwrap();

        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn jsonl_append_after_torn_tail_starts_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let first = FailureRecord::new("op", ErrorKind::Network, "reset", 0);
        {
            let mut store = JsonlStore::new(&path);
            store.append(&LedgerEntry::Failure(first.clone())).unwrap();
            store.sync().unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"entry\":\"fail").unwrap();
        drop(file);

        let second = FailureRecord::new("op", ErrorKind::Network, "reset", 1);
        let mut reopened = JsonlStore::new(&path);
        assert_eq!(reopened.load().unwrap().len(), 1);
        reopened.append(&LedgerEntry::Failure(second.clone())).unwrap();
        reopened.sync().unwrap();

        let entries = JsonlStore::new(&path).load().unwrap();
        assert_eq!(
            entries,
            vec![LedgerEntry::Failure(first), LedgerEntry::Failure(second)]
        );
    }

    #[test]
    fn jsonl_compact_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlStore::new(dir.path().join("ledger.jsonl"));
        let keep = FailureRecord::new("op", ErrorKind::Network, "keep", 0);
        for msg in ["a", "b", "c"] {
            store
                .append(&LedgerEntry::Failure(FailureRecord::new(
                    "op",
                    ErrorKind::Network,
                    msg,
                    0,
                )))
                .unwrap();
        }
        store.compact(std::slice::from_ref(&keep)).unwrap();
        store
            .append(&LedgerEntry::Resolved {
                id: keep.id,
                resolution_note: None,
                resolved_at: chrono::Utc::now(),
            })
            .unwrap();
        store.sync().unwrap();

        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], LedgerEntry::Failure(keep));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn memory_store_clones_share_entries() {
        let store = MemoryStore::new();
        let mut writer = store.clone();
        writer
            .append(&LedgerEntry::Failure(FailureRecord::new(
                "op",
                ErrorKind::Unknown,
                "?",
                0,
            )))
            .unwrap();
        assert_eq!(store.entries().len(), 1);
    }
}
