//! Breaker registry
//!
//! One [`Breaker`] per operation identifier, created lazily on first use.
//! Each breaker sits behind its own `parking_lot::Mutex`; the `DashMap` is
//! only touched to find or insert that mutex, so different identifiers never
//! contend on a common lock.

use crate::state::{Admission, Breaker, BreakerConfig, CircuitState};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

type Cell = Arc<Mutex<Breaker>>;
type ConfigResolver = dyn Fn(&str) -> BreakerConfig + Send + Sync;

/// Call rejected because the breaker is protecting a failing operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit open for {operation}")]
pub struct BreakerOpen {
    /// Operation identifier
    pub operation: String,
    /// Time until a probe will be admitted (`None` while a probe is running)
    pub retry_after: Option<Duration>,
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Operation identifier
    pub operation: String,
    /// Current position
    pub state: CircuitState,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Failures that open the breaker
    pub failure_threshold: u32,
    /// Cool-down before probing
    pub recovery_timeout: Duration,
    /// Time since the last recorded failure
    pub since_last_failure: Option<Duration>,
    /// Whether a half-open probe is running
    pub probe_in_flight: bool,
}

/// Admission ticket for one call
///
/// Report the outcome with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). Dropping a probe permit without
/// an outcome frees the probe slot so the next caller can probe instead.
#[must_use = "report the call outcome through the permit"]
pub struct BreakerPermit {
    operation: String,
    cell: Cell,
    probe: bool,
    settled: bool,
}

impl BreakerPermit {
    /// Operation this permit was issued for
    #[inline]
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Whether this call is the half-open probe
    #[inline]
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Call succeeded
    pub fn record_success(mut self) {
        self.settled = true;
        self.cell.lock().on_success(&self.operation, self.probe);
    }

    /// Call failed
    pub fn record_failure(mut self) {
        self.settled = true;
        self.cell.lock().on_failure(&self.operation, Instant::now());
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            tracing::debug!(operation = %self.operation, "probe abandoned; releasing slot");
            self.cell.lock().release_probe();
        }
    }
}

impl fmt::Debug for BreakerPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerPermit")
            .field("operation", &self.operation)
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}

/// Lazily populated map of per-operation breakers
pub struct BreakerRegistry {
    breakers: DashMap<String, Cell>,
    resolve: Box<ConfigResolver>,
}

impl BreakerRegistry {
    /// Registry where every operation uses `config`
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_resolver(move |_| config)
    }

    /// Registry with per-operation configuration
    ///
    /// `resolve` is called once per identifier, when its breaker is created.
    #[must_use]
    pub fn with_resolver<F>(resolve: F) -> Self
    where
        F: Fn(&str) -> BreakerConfig + Send + Sync + 'static,
    {
        Self {
            breakers: DashMap::new(),
            resolve: Box::new(resolve),
        }
    }

    fn cell(&self, operation: &str) -> Cell {
        if let Some(cell) = self.breakers.get(operation) {
            return Arc::clone(cell.value());
        }
        let entry = self
            .breakers
            .entry(operation.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Breaker::new((self.resolve)(operation)))));
        Arc::clone(entry.value())
    }

    /// Ask permission to run `operation`
    ///
    /// An open breaker whose recovery timeout has elapsed moves to half-open
    /// and hands out the single probe permit.
    ///
    /// # Errors
    /// Returns [`BreakerOpen`] while the breaker is open or a probe is running.
    pub fn acquire(&self, operation: &str) -> Result<BreakerPermit, BreakerOpen> {
        let cell = self.cell(operation);
        let admission = cell.lock().admit(operation, Instant::now());
        match admission {
            Admission::Pass | Admission::Probe => Ok(BreakerPermit {
                operation: operation.to_string(),
                cell,
                probe: admission == Admission::Probe,
                settled: false,
            }),
            Admission::Reject { retry_after } => {
                tracing::debug!(operation, ?retry_after, "circuit open; call rejected");
                Err(BreakerOpen {
                    operation: operation.to_string(),
                    retry_after,
                })
            }
        }
    }

    /// Current state without triggering transitions
    #[must_use]
    pub fn state_of(&self, operation: &str) -> Option<CircuitState> {
        self.breakers.get(operation).map(|cell| cell.lock().state)
    }

    /// Snapshot of every known breaker, sorted by operation
    #[must_use]
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let now = Instant::now();
        let cells: Vec<(String, Cell)> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        let mut snapshots: Vec<BreakerSnapshot> = cells
            .into_iter()
            .map(|(operation, cell)| {
                let b = cell.lock();
                BreakerSnapshot {
                    operation,
                    state: b.state,
                    consecutive_failures: b.consecutive_failures,
                    failure_threshold: b.config.failure_threshold,
                    recovery_timeout: b.config.recovery_timeout,
                    since_last_failure: b
                        .last_failure_time
                        .map(|t| now.saturating_duration_since(t)),
                    probe_in_flight: b.probe_in_flight,
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.operation.cmp(&b.operation));
        snapshots
    }

    /// Drop the breaker for `operation`; the next call starts fresh
    pub fn invalidate(&self, operation: &str) -> bool {
        let removed = self.breakers.remove(operation).is_some();
        if removed {
            tracing::info!(operation, "circuit breaker invalidated");
        }
        removed
    }

    /// Administrative override of a breaker's state
    ///
    /// Forcing `Open` stamps the failure time with now, so the full recovery
    /// timeout applies. Forcing `Closed` clears the failure count.
    pub fn force_state(&self, operation: &str, state: CircuitState) {
        self.cell(operation)
            .lock()
            .force(operation, state, Instant::now());
    }

    /// Number of registered breakers
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker has been created yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("breakers", &self.breakers.len())
            .finish_non_exhaustive()
    }
}
