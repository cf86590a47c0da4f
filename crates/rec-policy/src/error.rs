//! Error types for policy construction

use std::time::Duration;

/// Invalid retry policy parameters
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    /// A policy must allow at least one invocation
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    /// The first delay may not exceed the cap
    #[error("initial_delay {initial:?} exceeds max_delay {max:?}")]
    DelayExceedsCap {
        /// Requested initial delay
        initial: Duration,
        /// Requested cap
        max: Duration,
    },

    /// Backoff must never shrink
    #[error("exponential_base must be a finite number >= 1.0, got {0}")]
    InvalidBase(f64),

    /// Unrecognized error kind name
    #[error("unknown error kind: {0}")]
    UnknownKind(String),
}
