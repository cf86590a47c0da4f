//! Resilience context
//!
//! One [`ResilienceContext`] owns the classifier, the breaker registry, the
//! failure ledger and the configuration. It is cheap to clone; clones share
//! everything.

use crate::config::ResilienceConfig;
use crate::error::ConfigError;
use crate::health::HealthReport;
use dashmap::DashMap;
use rec_breaker::{BreakerRegistry, CircuitState};
use rec_ledger::FailureLedger;
use rec_policy::{
    Classifier, ErrorKind, JitterSource, KindPolicies, PolicyError, ThreadRngJitter,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub(crate) struct Inner {
    pub(crate) config: Arc<ResilienceConfig>,
    pub(crate) classifier: Classifier,
    pub(crate) breakers: BreakerRegistry,
    pub(crate) ledger: Arc<FailureLedger>,
    pub(crate) jitter: Arc<dyn JitterSource>,
    default_policies: Arc<KindPolicies>,
    operation_policies: DashMap<String, Arc<KindPolicies>>,
}

impl Inner {
    fn assemble(
        config: ResilienceConfig,
        policies: KindPolicies,
        ledger: Arc<FailureLedger>,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        let config = Arc::new(config);
        let resolver = Arc::clone(&config);
        Self {
            classifier: Classifier::new(policies.clone()),
            breakers: BreakerRegistry::with_resolver(move |op| resolver.breaker_config_for(op)),
            ledger,
            jitter,
            default_policies: Arc::new(policies),
            operation_policies: DashMap::new(),
            config,
        }
    }

    /// Kind policy table for `operation`, with its overrides applied
    pub(crate) fn policies_for(&self, operation: &str) -> Result<Arc<KindPolicies>, PolicyError> {
        let Some(settings) = self
            .config
            .operation(operation)
            .filter(|s| !s.retry.is_empty())
        else {
            return Ok(Arc::clone(&self.default_policies));
        };
        if let Some(cached) = self.operation_policies.get(operation) {
            return Ok(Arc::clone(cached.value()));
        }
        let mut table = (*self.default_policies).clone();
        for kind in ErrorKind::PRIORITY {
            table.apply(kind, &settings.retry)?;
        }
        let table = Arc::new(table);
        self.operation_policies
            .insert(operation.to_string(), Arc::clone(&table));
        Ok(table)
    }
}

/// Shared failure-handling state
#[derive(Clone)]
pub struct ResilienceContext {
    pub(crate) inner: Arc<Inner>,
}

impl ResilienceContext {
    /// Context with default configuration and an in-memory ledger
    #[must_use]
    pub fn new() -> Self {
        let config = ResilienceConfig::default();
        let ledger = FailureLedger::in_memory().with_retention(config.defaults.ledger_retention_window);
        Self {
            inner: Arc::new(Inner::assemble(
                config,
                KindPolicies::default(),
                Arc::new(ledger),
                Arc::new(ThreadRngJitter),
            )),
        }
    }

    /// Start building a context
    #[inline]
    #[must_use]
    pub fn builder() -> ResilienceContextBuilder {
        ResilienceContextBuilder::default()
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ResilienceConfig {
        &self.inner.config
    }

    /// Classifier in use
    #[inline]
    #[must_use]
    pub fn classifier(&self) -> &Classifier {
        &self.inner.classifier
    }

    /// Breaker registry
    #[inline]
    #[must_use]
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.inner.breakers
    }

    /// Failure ledger
    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &Arc<FailureLedger> {
        &self.inner.ledger
    }

    /// Summary of recent failures and breaker positions
    ///
    /// Read-only: no breaker transitions, no ledger writes.
    #[must_use]
    pub fn health_report(&self) -> HealthReport {
        let defaults = &self.inner.config.defaults;
        HealthReport::build(
            self.inner.ledger.patterns(defaults.pattern_window),
            &self.inner.breakers.snapshot(),
            &self.inner.ledger.unresolved(),
            defaults.recommendation_threshold,
        )
    }

    /// Forget the breaker for `operation`
    pub fn invalidate_breaker(&self, operation: &str) -> bool {
        self.inner.breakers.invalidate(operation)
    }

    /// Administratively set the breaker for `operation`
    pub fn force_state(&self, operation: &str, state: CircuitState) {
        self.inner.breakers.force_state(operation, state);
    }

    /// Drop ledger records older than the configured retention window
    pub fn prune_ledger(&self) -> usize {
        self.inner
            .ledger
            .prune(self.inner.config.defaults.ledger_retention_window)
    }
}

impl Default for ResilienceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResilienceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceContext")
            .field("breakers", &self.inner.breakers.len())
            .field("ledger", &self.inner.ledger)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ResilienceContext`]
#[derive(Default)]
pub struct ResilienceContextBuilder {
    config: Option<ResilienceConfig>,
    ledger: Option<Arc<FailureLedger>>,
    ledger_path: Option<PathBuf>,
    jitter: Option<Arc<dyn JitterSource>>,
}

impl ResilienceContextBuilder {
    /// Use `config` instead of the defaults
    #[must_use]
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Share an existing ledger
    ///
    /// The ledger keeps its own retention setting; see
    /// [`FailureLedger::with_retention`].
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<FailureLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Persist the ledger to a JSON Lines file
    #[must_use]
    pub fn ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = Some(path.into());
        self
    }

    /// Randomness for jittered delays
    #[must_use]
    pub fn jitter(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Some(Arc::new(jitter));
        self
    }

    /// Validate the configuration and build
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the configuration is invalid or the ledger
    /// file cannot be opened.
    pub fn build(self) -> Result<ResilienceContext, ConfigError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let policies = config.kind_policies()?;
        let retention = config.defaults.ledger_retention_window;
        let ledger = match (self.ledger, self.ledger_path) {
            (Some(ledger), _) => ledger,
            (None, Some(path)) => Arc::new(FailureLedger::open_jsonl(path)?.with_retention(retention)),
            (None, None) => Arc::new(FailureLedger::in_memory().with_retention(retention)),
        };
        let jitter = self
            .jitter
            .unwrap_or_else(|| Arc::new(ThreadRngJitter) as Arc<dyn JitterSource>);
        tracing::debug!(
            operations = config.operations.len(),
            kinds = config.kinds.len(),
            "resilience context built"
        );
        Ok(ResilienceContext {
            inner: Arc::new(Inner::assemble(config, policies, ledger, jitter)),
        })
    }
}

impl fmt::Debug for ResilienceContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceContextBuilder")
            .field("config", &self.config)
            .field("ledger_path", &self.ledger_path)
            .finish_non_exhaustive()
    }
}
