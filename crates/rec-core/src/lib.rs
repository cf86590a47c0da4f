//! REC Core
//!
//! Wraps fallible operations with classified retries, per-operation circuit
//! breakers and a failure ledger.
//!
//! # Architecture
//!
//! ```text
//! ResilienceContext ── Classifier      (rec-policy)
//!         │         ── BreakerRegistry (rec-breaker)
//!         │         ── FailureLedger   (rec-ledger)
//!         ▼
//!    AttemptLoop ── execute / execute_with / execute_cancellable (async)
//!               ── execute_blocking                             (threads)
//! ```
//!
//! # Example
//!
//! ```rust
//! use rec_core::{ExecutionErrorKind, ResilienceContext};
//! use std::io;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ctx = ResilienceContext::new();
//!
//! let value = ctx
//!     .execute("config.read", || async { Ok::<_, io::Error>(42) })
//!     .await
//!     .unwrap();
//! assert_eq!(value, 42);
//!
//! let denied = ctx
//!     .execute("config.write", || async {
//!         Err::<(), _>(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
//!     })
//!     .await
//!     .unwrap_err();
//! assert_eq!(denied.kind(), ExecutionErrorKind::NonRetryable);
//! assert_eq!(ctx.ledger().len(), 1);
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
mod executor;
pub mod health;

// Re-exports
pub use config::{GlobalDefaults, OperationSettings, ResilienceConfig};
pub use context::{ResilienceContext, ResilienceContextBuilder};
pub use error::{ConfigError, ExecutionError, ExecutionErrorKind, FailureContext};
pub use health::HealthReport;

pub use rec_breaker::{BreakerConfig, CircuitState};
pub use rec_ledger::{FailureLedger, FailureRecord};
pub use rec_policy::{ErrorKind, RetryPolicy};
pub use tokio_util::sync::CancellationToken;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for resilient execution
    pub use crate::{
        CancellationToken, CircuitState, ErrorKind, ExecutionError, ExecutionErrorKind,
        ResilienceConfig, ResilienceContext, RetryPolicy,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
