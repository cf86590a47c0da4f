//! Testing utilities for the REC workspace
//!
//! Scripted work units, error types with predictable classifications, and
//! tracing setup for tests.

#![allow(missing_docs)]

use parking_lot::Mutex;
use rec_policy::ErrorKind;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

/// Errors whose messages classify to a known kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptedError {
    #[error("connection reset by peer")]
    Network,
    #[error("permission denied")]
    Permission,
    #[error("upstream timed out")]
    Timeout,
    #[error("service unavailable")]
    Unavailable,
    #[error("429 too many requests")]
    RateLimited,
    /// Free text that matches no pattern
    #[error("{0}")]
    Opaque(String),
}

impl ScriptedError {
    pub fn opaque() -> Self {
        Self::Opaque("widget went sideways".into())
    }

    /// Kind the default classifier assigns to this error
    pub fn expected_kind(&self) -> ErrorKind {
        match self {
            Self::Network => ErrorKind::Network,
            Self::Permission => ErrorKind::Permission,
            Self::Timeout => ErrorKind::Timeout,
            Self::Unavailable => ErrorKind::TemporaryUnavailable,
            Self::RateLimited => ErrorKind::RateLimit,
            Self::Opaque(_) => ErrorKind::Unknown,
        }
    }
}

/// Work unit that replays a fixed sequence of outcomes and counts calls
///
/// Once the script runs out the last outcome repeats. Clones share the
/// script and the counter.
#[derive(Debug, Clone)]
pub struct ScriptedWork<T> {
    script: Arc<Mutex<Vec<Result<T, ScriptedError>>>>,
    calls: Arc<AtomicU32>,
}

impl<T: Clone> ScriptedWork<T> {
    pub fn new(script: Vec<Result<T, ScriptedError>>) -> Self {
        assert!(!script.is_empty(), "script needs at least one outcome");
        Self {
            script: Arc::new(Mutex::new(script)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fail `failures` times with `error`, then succeed with `value`
    pub fn fail_then_succeed(failures: usize, error: ScriptedError, value: T) -> Self {
        let mut script = vec![Err(error); failures];
        script.push(Ok(value));
        Self::new(script)
    }

    /// Fail on every call
    pub fn always_fail(error: ScriptedError) -> Self {
        Self::new(vec![Err(error)])
    }

    /// Run one call
    pub fn call(&self) -> Result<T, ScriptedError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let script = self.script.lock();
        script[index.min(script.len() - 1)].clone()
    }

    /// Run one call as an already-completed future
    pub fn call_async(&self) -> Ready<Result<T, ScriptedError>> {
        ready(self.call())
    }

    /// Calls made so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

static TRACING: Once = Once::new();

/// Install a test-friendly fmt subscriber once per process
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
