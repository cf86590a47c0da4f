//! Resilience configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! [defaults]
//! max_attempts = 3
//! initial_delay = "1s"
//! failure_threshold = 5
//!
//! [kinds.network]
//! max_attempts = 4
//!
//! [operations."billing-api"]
//! max_attempts = 2
//! failure_threshold = 2
//! ```
//!
//! Every field is optional. Retry settings resolve per field as
//! operation, then kind, then `[defaults]`. Each kind starts from its own
//! built-in attempt budget; `[defaults] max_attempts` replaces that budget
//! for every kind the built-in table retries.

use crate::error::ConfigError;
use rec_breaker::BreakerConfig;
use rec_policy::{ErrorKind, KindPolicies, RetryPolicy, RetrySettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Global defaults (`[defaults]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalDefaults {
    /// Invocations per call, first try included, for every retried kind
    ///
    /// Unset keeps each kind's built-in budget. Kinds with a single
    /// attempt are never raised.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Cap for any backoff delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff growth factor
    pub exponential_base: f64,
    /// Whether backoff delays are jittered
    pub jitter_enabled: bool,
    /// Consecutive failures that open a breaker
    pub failure_threshold: u32,
    /// Breaker cool-down before probing
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    /// Age after which ledger records are pruned
    #[serde(with = "humantime_serde")]
    pub ledger_retention_window: Duration,
    /// Window reported by the health report
    #[serde(with = "humantime_serde")]
    pub pattern_window: Duration,
    /// Failures of one kind within the window that trigger a recommendation
    pub recommendation_threshold: u64,
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter_enabled: true,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            ledger_retention_window: Duration::from_secs(7 * 24 * 60 * 60),
            pattern_window: Duration::from_secs(60 * 60),
            recommendation_threshold: 3,
        }
    }
}

/// Overrides for one operation (`[operations."<name>"]`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationSettings {
    /// Retry overrides, layered over the kind policy
    #[serde(flatten)]
    pub retry: RetrySettings,
    /// Breaker threshold override
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    /// Breaker cool-down override
    #[serde(default, with = "humantime_serde")]
    pub recovery_timeout: Option<Duration>,
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Global defaults
    pub defaults: GlobalDefaults,
    /// Per-kind retry overrides, keyed by snake_case kind name
    pub kinds: BTreeMap<String, RetrySettings>,
    /// Per-operation overrides, keyed by operation identifier
    pub operations: BTreeMap<String, OperationSettings>,
}

impl ResilienceConfig {
    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns [`ConfigError`] on syntax errors or invalid values.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&input)?;
        tracing::debug!(
            path = %path.display(),
            kinds = config.kinds.len(),
            operations = config.operations.len(),
            "resilience config loaded"
        );
        Ok(config)
    }

    /// Check every policy and threshold this config can produce
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let kinds = self.kind_policies()?;
        if self.defaults.failure_threshold == 0 {
            return Err(ConfigError::InvalidThreshold {
                scope: "defaults".into(),
            });
        }
        for (name, settings) in &self.operations {
            if settings.failure_threshold == Some(0) {
                return Err(ConfigError::InvalidThreshold {
                    scope: format!("operations.{name}"),
                });
            }
            for kind in ErrorKind::PRIORITY {
                settings
                    .retry
                    .apply(kinds.get(kind))
                    .map_err(|source| ConfigError::InvalidPolicy {
                        scope: format!("operations.{name} ({kind})"),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    /// Policy built from `[defaults]` alone
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidPolicy`] if the defaults are inconsistent.
    pub fn template_policy(&self) -> Result<RetryPolicy, ConfigError> {
        let d = &self.defaults;
        RetryPolicy::new(
            d.max_attempts
                .unwrap_or_else(|| RetryPolicy::default().max_attempts()),
            d.initial_delay,
            d.max_delay,
            d.exponential_base,
            d.jitter_enabled,
        )
        .map_err(|source| ConfigError::InvalidPolicy {
            scope: "defaults".into(),
            source,
        })
    }

    /// Per-kind policy table with `[kinds.*]` overrides applied
    ///
    /// # Errors
    /// Returns [`ConfigError`] for unknown kind names or invalid overrides.
    pub fn kind_policies(&self) -> Result<KindPolicies, ConfigError> {
        let mut policies = KindPolicies::from_template(&self.template_policy()?);
        if let Some(max_attempts) = self.defaults.max_attempts {
            let budget = RetrySettings {
                max_attempts: Some(max_attempts),
                ..RetrySettings::default()
            };
            for kind in ErrorKind::PRIORITY {
                if policies.get(kind).max_attempts() > 1 {
                    policies
                        .apply(kind, &budget)
                        .map_err(|source| ConfigError::InvalidPolicy {
                            scope: "defaults".into(),
                            source,
                        })?;
                }
            }
        }
        for (name, settings) in &self.kinds {
            let scope = format!("kinds.{name}");
            let kind: ErrorKind = name.parse().map_err(|source| ConfigError::InvalidPolicy {
                scope: scope.clone(),
                source,
            })?;
            policies
                .apply(kind, settings)
                .map_err(|source| ConfigError::InvalidPolicy { scope, source })?;
        }
        Ok(policies)
    }

    /// Overrides for `operation`, if configured
    #[must_use]
    pub fn operation(&self, operation: &str) -> Option<&OperationSettings> {
        self.operations.get(operation)
    }

    /// Breaker thresholds for `operation`
    #[must_use]
    pub fn breaker_config_for(&self, operation: &str) -> BreakerConfig {
        let settings = self.operation(operation);
        BreakerConfig::new(
            settings
                .and_then(|s| s.failure_threshold)
                .unwrap_or(self.defaults.failure_threshold),
            settings
                .and_then(|s| s.recovery_timeout)
                .unwrap_or(self.defaults.recovery_timeout),
        )
    }
}
