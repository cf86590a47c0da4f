//! Breaker state machine
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                                │ now - last_failure > recovery_timeout
//!     │ probe succeeds                 ▼
//!     └────────────────────────── HalfOpen ──probe fails──▶ Open
//! ```
//!
//! [`Breaker`] is plain data driven by explicit `now` values; the registry
//! owns the locking.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// Breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected without running
    Open,
    /// A single probe call is allowed
    HalfOpen,
}

impl CircuitState {
    /// Stable snake_case name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half_open" | "halfopen" => Ok(CircuitState::HalfOpen),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

/// Unrecognized breaker state name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown circuit state: {0}")]
pub struct UnknownState(pub String);

/// Thresholds for one breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker (at least 1)
    pub failure_threshold: u32,
    /// Cool-down before a probe is allowed
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
}

impl BreakerConfig {
    /// Create config
    #[inline]
    #[must_use]
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

/// Result of asking a breaker for admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Closed: pass through
    Pass,
    /// Half-open: this caller is the probe
    Probe,
    /// Open, or a probe is already in flight
    Reject { retry_after: Option<Duration> },
}

/// One breaker's mutable state
#[derive(Debug, Clone)]
pub(crate) struct Breaker {
    pub(crate) state: CircuitState,
    pub(crate) consecutive_failures: u32,
    pub(crate) last_failure_time: Option<Instant>,
    pub(crate) probe_in_flight: bool,
    pub(crate) config: BreakerConfig,
}

impl Breaker {
    pub(crate) fn new(config: BreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            probe_in_flight: false,
            config,
        }
    }

    pub(crate) fn admit(&mut self, operation: &str, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Pass,
            CircuitState::Open => {
                let last = *self.last_failure_time.get_or_insert(now);
                let elapsed = now.saturating_duration_since(last);
                if elapsed > self.config.recovery_timeout {
                    self.state = CircuitState::HalfOpen;
                    self.probe_in_flight = true;
                    tracing::info!(operation, "circuit breaker: open -> half_open (probe allowed)");
                    Admission::Probe
                } else {
                    Admission::Reject {
                        retry_after: Some(self.config.recovery_timeout - elapsed),
                    }
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    Admission::Reject { retry_after: None }
                } else {
                    self.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    pub(crate) fn on_success(&mut self, operation: &str, probe: bool) {
        match self.state {
            CircuitState::Closed => self.consecutive_failures = 0,
            CircuitState::HalfOpen if !probe => {
                // admitted while closed; only the probe decides recovery
                tracing::debug!(operation, "ignoring non-probe success while half-open");
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Closed;
                self.consecutive_failures = 0;
                self.probe_in_flight = false;
                tracing::info!(operation, "circuit breaker: half_open -> closed (recovered)");
            }
            CircuitState::Open => {
                // a call admitted before the breaker opened; it does not prove recovery
                tracing::debug!(operation, "ignoring stale success while open");
            }
        }
    }

    pub(crate) fn on_failure(&mut self, operation: &str, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_time = Some(now);
        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                    tracing::info!(
                        operation,
                        failures = self.consecutive_failures,
                        "circuit breaker: closed -> open"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.probe_in_flight = false;
                tracing::info!(operation, "circuit breaker: half_open -> open (probe failed)");
            }
            CircuitState::Open => {}
        }
    }

    pub(crate) fn release_probe(&mut self) {
        self.probe_in_flight = false;
    }

    pub(crate) fn force(&mut self, operation: &str, state: CircuitState, now: Instant) {
        match state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.last_failure_time = None;
            }
            CircuitState::Open => {
                self.last_failure_time = Some(now);
            }
            CircuitState::HalfOpen => {}
        }
        self.probe_in_flight = false;
        tracing::info!(operation, from = %self.state, to = %state, "circuit breaker: forced");
        self.state = state;
    }
}
