//! Failure records and persisted ledger entries

use chrono::{DateTime, Utc};
use rec_policy::ErrorKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One failed invocation of an operation
///
/// Immutable once appended, except for `resolved`/`resolution_note` which a
/// later success of the same operation may set once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Correlates resolution entries in durable stores
    pub id: Uuid,
    /// When the failure was observed
    pub timestamp: DateTime<Utc>,
    /// Operation identifier
    pub operation_name: String,
    /// Classified kind
    pub error_kind: ErrorKind,
    /// Rendered error message
    pub message: String,
    /// Debug rendering of the error, when available
    pub stack_trace: Option<String>,
    /// Retries already spent when this failure happened
    pub retry_count: u32,
    /// Whether a later success resolved this failure
    pub resolved: bool,
    /// Note attached on resolution
    pub resolution_note: Option<String>,
}

impl FailureRecord {
    /// New unresolved record stamped with the current time
    #[must_use]
    pub fn new(
        operation_name: impl Into<String>,
        error_kind: ErrorKind,
        message: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation_name: operation_name.into(),
            error_kind,
            message: message.into(),
            stack_trace: None,
            retry_count,
            resolved: false,
            resolution_note: None,
        }
    }

    /// Attach a stack trace
    #[inline]
    #[must_use]
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// Override the timestamp (imports, tests)
    #[inline]
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Line in a durable ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum LedgerEntry {
    /// A failure was recorded
    Failure(FailureRecord),
    /// A failure was resolved
    Resolved {
        /// Id of the resolved record
        id: Uuid,
        /// Note attached on resolution
        resolution_note: Option<String>,
        /// When the resolution happened
        resolved_at: DateTime<Utc>,
    },
}

/// Replay entries in order into a list of records
///
/// Resolution entries for unknown ids are ignored.
#[must_use]
pub fn replay(entries: impl IntoIterator<Item = LedgerEntry>) -> Vec<FailureRecord> {
    let mut records: Vec<FailureRecord> = Vec::new();
    for entry in entries {
        match entry {
            LedgerEntry::Failure(record) => records.push(record),
            LedgerEntry::Resolved {
                id,
                resolution_note,
                ..
            } => {
                if let Some(record) = records.iter_mut().rev().find(|r| r.id == id) {
                    record.resolved = true;
                    record.resolution_note = resolution_note;
                }
            }
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn failure_line_keeps_field_names() {
        let record = FailureRecord::new("db.query", ErrorKind::Timeout, "timed out", 1)
            .with_stack_trace("Timeout { secs: 5 }");
        let line = serde_json::to_value(LedgerEntry::Failure(record)).unwrap();
        for field in [
            "timestamp",
            "operation_name",
            "error_kind",
            "message",
            "stack_trace",
            "retry_count",
            "resolved",
            "resolution_note",
        ] {
            assert!(line.get(field).is_some(), "missing {field}");
        }
        assert_eq!(line["entry"], "failure");
        assert_eq!(line["error_kind"], "timeout");
    }

    #[test]
    fn replay_applies_resolutions() {
        let a = FailureRecord::new("op", ErrorKind::Network, "reset", 0);
        let b = FailureRecord::new("op", ErrorKind::Network, "reset", 1);
        let entries = vec![
            LedgerEntry::Failure(a.clone()),
            LedgerEntry::Failure(b.clone()),
            LedgerEntry::Resolved {
                id: b.id,
                resolution_note: Some("recovered".into()),
                resolved_at: Utc::now(),
            },
            LedgerEntry::Resolved {
                id: Uuid::new_v4(),
                resolution_note: None,
                resolved_at: Utc::now(),
            },
        ];
        let records = replay(entries);
        assert_eq!(records.len(), 2);
        assert!(!records[0].resolved);
        assert!(records[1].resolved);
        assert_eq!(records[1].resolution_note.as_deref(), Some("recovered"));
    }
}
