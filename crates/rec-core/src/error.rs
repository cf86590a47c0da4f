//! Error types for REC Core
//!
//! - [`ConfigError`]: configuration could not be loaded or is inconsistent
//! - [`ExecutionError`]: terminal outcome of a resilient execution, carrying
//!   the caller's own error where there is one

use rec_ledger::LedgerError;
use rec_policy::{ErrorKind, PolicyError};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file unreadable
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or type error
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configured policy violates its invariants
    #[error("invalid policy in {scope}: {source}")]
    InvalidPolicy {
        /// Config section at fault
        scope: String,
        /// Violated invariant
        #[source]
        source: PolicyError,
    },

    /// A breaker threshold of zero
    #[error("failure_threshold in {scope} must be at least 1")]
    InvalidThreshold {
        /// Config section at fault
        scope: String,
    },

    /// Ledger store could not be opened
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Annotation attached to terminal failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureContext {
    /// Operation identifier
    pub operation: String,
    /// Kind of the last failure
    pub kind: ErrorKind,
    /// Invocations of the work unit
    pub attempts: u32,
    /// Wall time from the first admission check to the terminal failure
    pub total_elapsed: Duration,
}

impl fmt::Display for FailureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed with {} after {} attempt(s) in {:?}",
            self.operation, self.kind, self.attempts, self.total_elapsed
        )
    }
}

/// Discriminant of [`ExecutionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionErrorKind {
    /// Rejected by an open breaker
    CircuitOpen,
    /// Attempt budget spent
    RetriesExhausted,
    /// Failure classified as not worth retrying
    NonRetryable,
    /// Cancelled during a backoff wait
    Cancelled,
    /// The core itself could not proceed
    Internal,
}

impl ExecutionErrorKind {
    /// Stable snake_case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::RetriesExhausted => "retries_exhausted",
            Self::NonRetryable => "non_retryable",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of [`ResilienceContext::execute`](crate::ResilienceContext::execute)
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError<E>
where
    E: std::error::Error + 'static,
{
    /// The breaker rejected the call before `work` ran
    #[error("circuit open for {operation}")]
    CircuitOpen {
        /// Operation identifier
        operation: String,
        /// Time until a probe will be admitted, when known
        retry_after: Option<Duration>,
        /// Invocations made before the rejection
        attempts: u32,
        /// Error from the previous attempt of this call, if any
        last_error: Option<E>,
    },

    /// Attempt budget spent
    #[error("{context}: retries exhausted: {source}")]
    RetriesExhausted {
        /// Where and how it failed
        context: FailureContext,
        /// Last error returned by `work`
        source: E,
    },

    /// Failure classified as not retryable
    #[error("{context}: not retryable: {source}")]
    NonRetryable {
        /// Where and how it failed
        context: FailureContext,
        /// Error returned by `work`
        source: E,
    },

    /// Cancellation observed before or between attempts
    #[error("execution of {operation} cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Operation identifier
        operation: String,
        /// Invocations made before cancellation
        attempts: u32,
        /// Error from the previous attempt, if any
        last_error: Option<E>,
    },

    /// The core could not run the operation
    #[error("internal error executing {operation}: {message}")]
    Internal {
        /// Operation identifier
        operation: String,
        /// What went wrong
        message: String,
    },
}

impl<E> ExecutionError<E>
where
    E: std::error::Error + 'static,
{
    /// Discriminant
    #[must_use]
    pub fn kind(&self) -> ExecutionErrorKind {
        match self {
            Self::CircuitOpen { .. } => ExecutionErrorKind::CircuitOpen,
            Self::RetriesExhausted { .. } => ExecutionErrorKind::RetriesExhausted,
            Self::NonRetryable { .. } => ExecutionErrorKind::NonRetryable,
            Self::Cancelled { .. } => ExecutionErrorKind::Cancelled,
            Self::Internal { .. } => ExecutionErrorKind::Internal,
        }
    }

    /// Terminal failure annotation, for exhausted and non-retryable failures
    #[must_use]
    pub fn context(&self) -> Option<&FailureContext> {
        match self {
            Self::RetriesExhausted { context, .. } | Self::NonRetryable { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// Invocations of `work` made by this call
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::CircuitOpen { attempts, .. } | Self::Cancelled { attempts, .. } => *attempts,
            Self::RetriesExhausted { context, .. } | Self::NonRetryable { context, .. } => {
                context.attempts
            }
            Self::Internal { .. } => 0,
        }
    }

    /// Borrow the caller's error, if any
    #[must_use]
    pub fn source_error(&self) -> Option<&E> {
        match self {
            Self::RetriesExhausted { source, .. } | Self::NonRetryable { source, .. } => {
                Some(source)
            }
            Self::CircuitOpen { last_error, .. } | Self::Cancelled { last_error, .. } => {
                last_error.as_ref()
            }
            Self::Internal { .. } => None,
        }
    }

    /// Recover the caller's error, if any
    #[must_use]
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::RetriesExhausted { source, .. } | Self::NonRetryable { source, .. } => {
                Some(source)
            }
            Self::CircuitOpen { last_error, .. } | Self::Cancelled { last_error, .. } => {
                last_error
            }
            Self::Internal { .. } => None,
        }
    }

    /// Whether the breaker rejected the call
    #[inline]
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}
