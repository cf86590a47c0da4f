//! Health report

use rec_breaker::{BreakerSnapshot, CircuitState};
use rec_ledger::FailureRecord;
use rec_policy::ErrorKind;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Operational summary for dashboards and CLIs
///
/// All maps are ordered, so two reports taken without intervening activity
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Failures per kind within the configured pattern window
    pub error_patterns_window: BTreeMap<ErrorKind, u64>,
    /// Breaker state name per operation
    pub breaker_states: BTreeMap<String, String>,
    /// Human-readable advice
    pub recommendations: Vec<String>,
}

impl HealthReport {
    pub(crate) fn build(
        patterns: BTreeMap<ErrorKind, u64>,
        breakers: &[BreakerSnapshot],
        unresolved: &[FailureRecord],
        recommendation_threshold: u64,
    ) -> Self {
        let mut recommendations = Vec::new();

        for (kind, count) in &patterns {
            if *count >= recommendation_threshold {
                recommendations.push(format!(
                    "{count} {kind} failures in the pattern window: {}",
                    advice(*kind)
                ));
            }
        }

        for snapshot in breakers.iter().filter(|s| s.state == CircuitState::Open) {
            recommendations.push(format!(
                "circuit for '{}' is open after {} consecutive failures; investigate before forcing it closed",
                snapshot.operation, snapshot.consecutive_failures
            ));
        }

        let open: BTreeSet<&str> = breakers
            .iter()
            .filter(|s| s.state != CircuitState::Closed)
            .map(|s| s.operation.as_str())
            .collect();
        let lingering: BTreeSet<&str> = unresolved
            .iter()
            .map(|r| r.operation_name.as_str())
            .filter(|op| !open.contains(op))
            .collect();
        if !lingering.is_empty() {
            let count = unresolved
                .iter()
                .filter(|r| lingering.contains(r.operation_name.as_str()))
                .count();
            recommendations.push(format!(
                "{count} unresolved failure(s) on operations with closed circuits: {}",
                lingering.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }

        Self {
            error_patterns_window: patterns,
            breaker_states: breakers
                .iter()
                .map(|s| (s.operation.clone(), s.state.as_str().to_string()))
                .collect(),
            recommendations,
        }
    }

    /// Operations whose breaker is open
    pub fn open_circuits(&self) -> impl Iterator<Item = &str> {
        self.breaker_states
            .iter()
            .filter(|(_, state)| state.as_str() == CircuitState::Open.as_str())
            .map(|(op, _)| op.as_str())
    }

    /// No open breakers and nothing to recommend
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.open_circuits().next().is_none() && self.recommendations.is_empty()
    }
}

fn advice(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Timeout => "raise timeouts or shrink request payloads",
        ErrorKind::Permission => "verify credentials and access grants",
        ErrorKind::Network => "check connectivity to downstream services",
        ErrorKind::RateLimit => "lower the request rate or request a higher quota",
        ErrorKind::ResourceExhausted => "provision more capacity on the affected host",
        ErrorKind::SyntaxOrProgramming => "fix the calling code; retries cannot help",
        ErrorKind::DependencyMissing => "install or configure the missing dependency",
        ErrorKind::TemporaryUnavailable => "consider a longer recovery timeout for flapping services",
        ErrorKind::Unknown => "add classification patterns for these failures",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn snapshot(operation: &str, state: CircuitState) -> BreakerSnapshot {
        BreakerSnapshot {
            operation: operation.into(),
            state,
            consecutive_failures: if state == CircuitState::Closed { 0 } else { 3 },
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            since_last_failure: None,
            probe_in_flight: false,
        }
    }

    #[test]
    fn test_recommendations() {
        let patterns = BTreeMap::from([(ErrorKind::Network, 4), (ErrorKind::Timeout, 1)]);
        let breakers = [
            snapshot("billing", CircuitState::Open),
            snapshot("search", CircuitState::Closed),
        ];
        let unresolved = [
            FailureRecord::new("billing", ErrorKind::Network, "reset", 0),
            FailureRecord::new("search", ErrorKind::Timeout, "slow", 0),
        ];

        let report = HealthReport::build(patterns, &breakers, &unresolved, 3);

        assert_eq!(report.recommendations.len(), 3);
        assert!(report.recommendations[0].starts_with("4 network failures"));
        assert!(report.recommendations[1].contains("'billing' is open"));
        assert!(report.recommendations[2].ends_with("closed circuits: search"));
        assert_eq!(report.breaker_states["billing"], "open");
        assert_eq!(report.open_circuits().collect::<Vec<_>>(), vec!["billing"]);
        assert!(!report.is_healthy());
    }

    #[test]
    fn test_quiet_system_is_healthy() {
        let report = HealthReport::build(BTreeMap::new(), &[], &[], 3);
        assert!(report.is_healthy());
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({
                "error_patterns_window": {},
                "breaker_states": {},
                "recommendations": []
            })
        );
    }
}
