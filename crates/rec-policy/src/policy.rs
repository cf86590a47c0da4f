//! Retry policies and backoff math
//!
//! `delay = min(initial_delay * exponential_base^attempt, max_delay)`, with
//! `attempt` zero-indexed. When jitter is enabled the delay is scaled by a
//! factor in `[0.5, 1.0)` drawn from a caller-supplied [`JitterSource`].

use crate::error::PolicyError;
use crate::jitter::JitterSource;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable backoff parameters
///
/// Invariants (checked by every constructor, including deserialization):
/// - `max_attempts >= 1`
/// - `initial_delay <= max_delay`
/// - `exponential_base` is finite and `>= 1.0`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RetryPolicyParams", into = "RetryPolicyParams")]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
    jitter: bool,
}

impl RetryPolicy {
    /// Create a validated policy
    ///
    /// # Errors
    /// Returns [`PolicyError`] if any invariant is violated.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        exponential_base: f64,
        jitter: bool,
    ) -> Result<Self, PolicyError> {
        if max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        if initial_delay > max_delay {
            return Err(PolicyError::DelayExceedsCap {
                initial: initial_delay,
                max: max_delay,
            });
        }
        if !exponential_base.is_finite() || exponential_base < 1.0 {
            return Err(PolicyError::InvalidBase(exponential_base));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            exponential_base,
            jitter,
        })
    }

    /// One invocation, no retries
    #[inline]
    #[must_use]
    pub const fn single_attempt(delay: Duration) -> Self {
        Self {
            max_attempts: 1,
            initial_delay: delay,
            max_delay: delay,
            exponential_base: 1.0,
            jitter: false,
        }
    }

    /// Maximum number of invocations (first try included)
    #[inline]
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry
    #[inline]
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Upper bound for any delay
    #[inline]
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Growth factor per attempt
    #[inline]
    #[must_use]
    pub const fn exponential_base(&self) -> f64 {
        self.exponential_base
    }

    /// Whether delays are jittered
    #[inline]
    #[must_use]
    pub const fn jitter(&self) -> bool {
        self.jitter
    }

    /// Capped exponential delay for `attempt`, without jitter
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.exponential_base.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(secs)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay to wait after the failed attempt `attempt`
    ///
    /// Pure unless jitter is enabled, in which case exactly one sample is
    /// drawn from `source`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, source: &dyn JitterSource) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let sample = source.sample();
        let sample = if sample.is_finite() {
            sample.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let factor = (0.5 + 0.5 * sample).min(1.0 - f64::EPSILON);
        base.mul_f64(factor)
    }

    /// Copy with a different attempt budget
    ///
    /// # Errors
    /// Returns [`PolicyError::ZeroAttempts`] for `0`.
    pub fn with_max_attempts(self, max_attempts: u32) -> Result<Self, PolicyError> {
        Self::new(
            max_attempts,
            self.initial_delay,
            self.max_delay,
            self.exponential_base,
            self.jitter,
        )
    }

    /// Copy with jitter switched on or off
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// Serialized form of [`RetryPolicy`] (durations as humantime strings)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyParams {
    /// Maximum number of invocations
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Cap for any delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub exponential_base: f64,
    /// Whether delays are jittered
    #[serde(default)]
    pub jitter: bool,
}

impl TryFrom<RetryPolicyParams> for RetryPolicy {
    type Error = PolicyError;

    fn try_from(params: RetryPolicyParams) -> Result<Self, Self::Error> {
        RetryPolicy::new(
            params.max_attempts,
            params.initial_delay,
            params.max_delay,
            params.exponential_base,
            params.jitter,
        )
    }
}

impl From<RetryPolicy> for RetryPolicyParams {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            initial_delay: policy.initial_delay,
            max_delay: policy.max_delay,
            exponential_base: policy.exponential_base,
            jitter: policy.jitter,
        }
    }
}

/// Partial retry settings layered over a base policy
///
/// Used for per-kind and per-operation overrides; `None` keeps the base
/// value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Override for the attempt budget
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Override for the first delay
    #[serde(default, with = "humantime_serde")]
    pub initial_delay: Option<Duration>,
    /// Override for the delay cap
    #[serde(default, with = "humantime_serde")]
    pub max_delay: Option<Duration>,
    /// Override for the growth factor
    #[serde(default)]
    pub exponential_base: Option<f64>,
    /// Override for jitter
    #[serde(default)]
    pub jitter_enabled: Option<bool>,
}

impl RetrySettings {
    /// Whether no field is overridden
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Layer these settings over `base`
    ///
    /// # Errors
    /// Returns [`PolicyError`] if the merged parameters are invalid.
    pub fn apply(&self, base: &RetryPolicy) -> Result<RetryPolicy, PolicyError> {
        RetryPolicy::new(
            self.max_attempts.unwrap_or(base.max_attempts),
            self.initial_delay.unwrap_or(base.initial_delay),
            self.max_delay.unwrap_or(base.max_delay),
            self.exponential_base.unwrap_or(base.exponential_base),
            self.jitter_enabled.unwrap_or(base.jitter),
        )
    }
}
