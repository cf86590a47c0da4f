//! Error types for ledger storage

use std::path::PathBuf;

/// Storage failure
///
/// Never surfaces from [`FailureLedger::record`](crate::FailureLedger::record);
/// only opening, flushing and compacting report it.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Filesystem failure
    #[error("ledger io error at {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Entry could not be encoded or decoded
    #[error("ledger encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Background writer is gone
    #[error("ledger writer stopped")]
    WriterStopped,

    /// Store-specific failure
    #[error("ledger store error: {0}")]
    Store(String),
}

impl LedgerError {
    /// Wrap an io error with the path it concerns
    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
