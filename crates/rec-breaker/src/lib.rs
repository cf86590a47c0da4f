//! REC Breaker
//!
//! Per-operation circuit breakers protecting callers from chronically
//! failing dependencies.
//!
//! # Overview
//!
//! - **BreakerRegistry**: lazily creates one breaker per operation identifier
//! - **BreakerPermit**: admission ticket used to report the call outcome
//! - **CircuitState**: `Closed → Open → HalfOpen → Closed`
//!
//! # Example
//!
//! ```rust
//! use rec_breaker::{BreakerConfig, BreakerRegistry, CircuitState};
//! use std::time::Duration;
//!
//! let registry = BreakerRegistry::new(BreakerConfig::new(1, Duration::from_secs(30)));
//!
//! registry.acquire("payments").unwrap().record_failure();
//! assert_eq!(registry.state_of("payments"), Some(CircuitState::Open));
//! assert!(registry.acquire("payments").is_err());
//! ```

#![warn(missing_docs)]

pub mod registry;
pub mod state;

// Re-exports
pub use registry::{BreakerOpen, BreakerPermit, BreakerRegistry, BreakerSnapshot};
pub use state::{BreakerConfig, CircuitState, UnknownState};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
