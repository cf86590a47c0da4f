//! REC Policy
//!
//! Leaf building blocks of the resilient execution core:
//! - **ErrorKind**: the failure taxonomy
//! - **Classifier**: maps arbitrary errors to a kind, a retryability flag and
//!   a default retry policy
//! - **RetryPolicy**: immutable backoff parameters with capped exponential
//!   delays and optional jitter
//! - **JitterSource**: injectable randomness for jittered delays
//!
//! # Example
//!
//! ```rust
//! use rec_policy::{Classifier, ErrorKind, FixedJitter};
//! use std::io;
//!
//! let classifier = Classifier::default();
//! let err = io::Error::new(io::ErrorKind::Other, "connection reset by peer");
//! let class = classifier.classify(&err);
//!
//! assert_eq!(class.kind, ErrorKind::Network);
//! assert!(class.retryable);
//!
//! // A fixed jitter sample keeps delays deterministic.
//! let delay = class.policy.delay_for(1, &FixedJitter::new(0.999));
//! assert!(delay <= class.policy.max_delay());
//! ```

#![warn(missing_docs)]

pub mod classifier;
pub mod error;
pub mod jitter;
pub mod kind;
pub mod policy;

// Re-exports
pub use classifier::{Classification, Classifier, KindPolicies};
pub use error::PolicyError;
pub use jitter::{FixedJitter, JitterSource, SeededJitter, ThreadRngJitter};
pub use kind::ErrorKind;
pub use policy::{RetryPolicy, RetryPolicyParams, RetrySettings};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for classification and backoff
    pub use crate::{
        Classification, Classifier, ErrorKind, JitterSource, KindPolicies, RetryPolicy,
        RetrySettings,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
