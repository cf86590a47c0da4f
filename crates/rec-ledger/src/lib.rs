//! REC Ledger
//!
//! Append-only record of operation failures with windowed pattern queries.
//!
//! # Overview
//!
//! - **FailureLedger**: in-memory index plus a background writer thread
//! - **FailureRecord**: one failed invocation
//! - **LedgerStore**: persistence seam, with [`MemoryStore`] and the durable
//!   JSON Lines [`JsonlStore`]
//!
//! # Example
//!
//! ```rust
//! use rec_ledger::FailureLedger;
//! use rec_policy::ErrorKind;
//! use std::time::Duration;
//!
//! let ledger = FailureLedger::in_memory();
//! ledger.record("search", "connection reset", None, ErrorKind::Network, 0);
//!
//! let counts = ledger.patterns(Duration::from_secs(3600));
//! assert_eq!(counts[&ErrorKind::Network], 1);
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod ledger;
pub mod record;
pub mod store;

// Re-exports
pub use error::LedgerError;
pub use ledger::{FailureLedger, PRUNE_INTERVAL, WRITE_QUEUE_CAPACITY};
pub use record::{replay, FailureRecord, LedgerEntry};
pub use store::{JsonlStore, LedgerStore, MemoryStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
