//! Failure ledger
//!
//! `record()` is off the hot path: it appends to the in-memory index under a
//! short `parking_lot::Mutex` and hands the entry to a background writer
//! thread over a bounded crossbeam channel. Queries always read the
//! in-memory index, so a record is visible to [`FailureLedger::patterns`] as
//! soon as `record()` returns.
//!
//! The writer drains its queue continuously and syncs the store whenever the
//! queue runs empty. Store failures are logged with `tracing::warn!` and
//! dropped. When the queue is full the entry stays in memory only.
//!
//! With a retention window set, every [`PRUNE_INTERVAL`]th append also drops
//! records older than the window, which keeps the index bounded.

use crate::error::LedgerError;
use crate::record::{replay, FailureRecord, LedgerEntry};
use crate::store::{JsonlStore, LedgerStore};
use chrono::{DateTime, TimeDelta, Utc};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use rec_policy::ErrorKind;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

/// Entries queued for the writer thread before new ones are dropped
pub const WRITE_QUEUE_CAPACITY: usize = 4096;

/// Appends between automatic retention sweeps
pub const PRUNE_INTERVAL: u64 = 256;

enum Command {
    Write(LedgerEntry),
    Flush(Sender<()>),
    Compact(Vec<FailureRecord>),
}

struct Writer {
    tx: Option<Sender<Command>>,
    handle: Option<JoinHandle<()>>,
}

impl Writer {
    fn spawn<S: LedgerStore>(store: S) -> Result<Self, LedgerError> {
        let (tx, rx) = channel::bounded::<Command>(WRITE_QUEUE_CAPACITY);
        let handle = std::thread::Builder::new()
            .name("rec-ledger-writer".into())
            .spawn(move || drain(store, &rx))
            .map_err(|e| LedgerError::Store(format!("failed to spawn ledger writer: {e}")))?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue an entry without blocking the caller
    fn write(&self, entry: LedgerEntry) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send(Command::Write(entry)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    capacity = WRITE_QUEUE_CAPACITY,
                    "ledger write queue full; entry kept in memory only"
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("ledger writer stopped; entry kept in memory only");
            }
        }
    }

    /// Queue a control command, waiting for room if needed
    fn send(&self, command: Command) {
        let delivered = self
            .tx
            .as_ref()
            .is_some_and(|tx| tx.send(command).is_ok());
        if !delivered {
            tracing::warn!("ledger writer stopped; command dropped");
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        // closing the channel lets the writer finish its queue and exit
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("ledger writer panicked");
            }
        }
    }
}

fn drain<S: LedgerStore>(mut store: S, rx: &Receiver<Command>) {
    for command in rx {
        match command {
            Command::Write(entry) => {
                if let Err(e) = store.append(&entry) {
                    tracing::warn!(error = %e, "failed to persist ledger entry");
                }
            }
            Command::Compact(records) => {
                if let Err(e) = store.compact(&records) {
                    tracing::warn!(error = %e, "failed to compact ledger store");
                }
            }
            Command::Flush(ack) => {
                sync(&mut store);
                let _ = ack.send(());
                continue;
            }
        }
        if rx.is_empty() {
            sync(&mut store);
        }
    }
    sync(&mut store);
}

fn sync<S: LedgerStore>(store: &mut S) {
    if let Err(e) = store.sync() {
        tracing::warn!(error = %e, "failed to sync ledger store");
    }
}

/// Append-only log of failures with windowed pattern queries
///
/// Thread-safe; share it behind an `Arc`.
pub struct FailureLedger {
    records: Mutex<Vec<FailureRecord>>,
    writer: Option<Writer>,
    retention: Option<Duration>,
    appended: AtomicU64,
}

impl FailureLedger {
    /// Ledger with no backing store
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            writer: None,
            retention: None,
            appended: AtomicU64::new(0),
        }
    }

    /// Ledger over `store`, replaying whatever it already holds
    ///
    /// # Errors
    /// Returns [`LedgerError`] if the store cannot be read or the writer
    /// thread cannot be started.
    pub fn open<S: LedgerStore>(mut store: S) -> Result<Self, LedgerError> {
        let records = replay(store.load()?);
        tracing::debug!(records = records.len(), "ledger opened");
        Ok(Self {
            records: Mutex::new(records),
            writer: Some(Writer::spawn(store)?),
            retention: None,
            appended: AtomicU64::new(0),
        })
    }

    /// Ledger over a JSON Lines file
    ///
    /// # Errors
    /// See [`open`](Self::open).
    pub fn open_jsonl(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        Self::open(JsonlStore::new(path))
    }

    /// Drop records older than `retention` automatically as new ones arrive
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Automatic retention window, if any
    #[inline]
    #[must_use]
    pub fn retention(&self) -> Option<Duration> {
        self.retention
    }

    /// Record a failure and return its id
    ///
    /// Never blocks on I/O and never fails.
    pub fn record(
        &self,
        operation_name: &str,
        message: &str,
        stack_trace: Option<String>,
        kind: ErrorKind,
        retry_count: u32,
    ) -> Uuid {
        let mut record = FailureRecord::new(operation_name, kind, message, retry_count);
        record.stack_trace = stack_trace;
        self.append(record)
    }

    /// Append a prepared record and return its id
    pub fn append(&self, record: FailureRecord) -> Uuid {
        let id = record.id;
        tracing::debug!(
            operation = %record.operation_name,
            kind = %record.error_kind,
            retry_count = record.retry_count,
            "failure recorded"
        );
        let mut records = self.records.lock();
        if let Some(writer) = &self.writer {
            // sent under the lock so store order matches index order
            writer.write(LedgerEntry::Failure(record.clone()));
        }
        records.push(record);
        let appended = self.appended.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(retention) = self.retention {
            if appended % PRUNE_INTERVAL == 0 {
                self.prune_locked(&mut records, retention);
            }
        }
        id
    }

    /// Resolve the most recent unresolved failure of `operation_name`
    ///
    /// Returns `false` when there was nothing to resolve.
    pub fn mark_resolved(&self, operation_name: &str, note: Option<&str>) -> bool {
        let mut records = self.records.lock();
        let Some(record) = records
            .iter_mut()
            .rev()
            .find(|r| r.operation_name == operation_name && !r.resolved)
        else {
            return false;
        };
        self.resolve_record(record, note);
        true
    }

    /// Resolve the unresolved records among `ids`
    ///
    /// Returns how many were resolved; unknown or already resolved ids are
    /// skipped.
    pub fn resolve(&self, ids: &[Uuid], note: Option<&str>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut records = self.records.lock();
        let mut resolved = 0;
        for record in records
            .iter_mut()
            .filter(|r| !r.resolved && ids.contains(&r.id))
        {
            self.resolve_record(record, note);
            resolved += 1;
        }
        resolved
    }

    fn resolve_record(&self, record: &mut FailureRecord, note: Option<&str>) {
        record.resolved = true;
        record.resolution_note = note.map(str::to_owned);
        if let Some(writer) = &self.writer {
            writer.write(LedgerEntry::Resolved {
                id: record.id,
                resolution_note: record.resolution_note.clone(),
                resolved_at: Utc::now(),
            });
        }
    }

    /// Failure counts per kind over the trailing `window`
    #[must_use]
    pub fn patterns(&self, window: Duration) -> BTreeMap<ErrorKind, u64> {
        self.patterns_since(cutoff(window))
    }

    /// Failure counts per kind for records at or after `cutoff`
    #[must_use]
    pub fn patterns_since(&self, cutoff: DateTime<Utc>) -> BTreeMap<ErrorKind, u64> {
        let records = self.records.lock();
        let mut counts = BTreeMap::new();
        for record in records.iter().filter(|r| r.timestamp >= cutoff) {
            *counts.entry(record.error_kind).or_insert(0) += 1;
        }
        counts
    }

    /// All records of one operation, oldest first
    #[must_use]
    pub fn records_for(&self, operation_name: &str) -> Vec<FailureRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.operation_name == operation_name)
            .cloned()
            .collect()
    }

    /// All unresolved records, oldest first
    #[must_use]
    pub fn unresolved(&self) -> Vec<FailureRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| !r.resolved)
            .cloned()
            .collect()
    }

    /// Number of records held
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no failures are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drop records older than `retention` and compact the store
    ///
    /// Returns the number of records removed.
    pub fn prune(&self, retention: Duration) -> usize {
        let mut records = self.records.lock();
        self.prune_locked(&mut records, retention)
    }

    fn prune_locked(&self, records: &mut Vec<FailureRecord>, retention: Duration) -> usize {
        let cutoff = cutoff(retention);
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        let removed = before - records.len();
        if removed > 0 {
            if let Some(writer) = &self.writer {
                writer.send(Command::Compact(records.clone()));
            }
            tracing::info!(removed, remaining = records.len(), "ledger pruned");
        }
        removed
    }

    /// Block until every entry enqueued so far has reached the store
    ///
    /// # Errors
    /// Returns [`LedgerError::WriterStopped`] if the writer thread is gone.
    pub fn flush(&self) -> Result<(), LedgerError> {
        let Some(tx) = self.writer.as_ref().and_then(|w| w.tx.as_ref()) else {
            return Ok(());
        };
        let (ack_tx, ack_rx) = channel::bounded(1);
        tx.send(Command::Flush(ack_tx))
            .map_err(|_| LedgerError::WriterStopped)?;
        ack_rx.recv().map_err(|_| LedgerError::WriterStopped)
    }
}

impl Default for FailureLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for FailureLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureLedger")
            .field("records", &self.len())
            .field("durable", &self.writer.is_some())
            .field("retention", &self.retention)
            .finish()
    }
}

fn cutoff(window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| Utc::now().checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
