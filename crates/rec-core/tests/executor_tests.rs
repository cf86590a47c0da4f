use pretty_assertions::assert_eq;
use rec_core::{
    CancellationToken, CircuitState, ErrorKind, ExecutionError, ExecutionErrorKind,
    FailureLedger, FailureRecord, ResilienceConfig, ResilienceContext, RetryPolicy,
};
use rec_policy::FixedJitter;
use rec_test_utils::{init_tracing, ScriptedError, ScriptedWork};
use std::time::Duration;

fn context(toml: &str) -> ResilienceContext {
    init_tracing();
    ResilienceContext::builder()
        .config(ResilienceConfig::from_toml_str(toml).unwrap())
        .jitter(FixedJitter::new(0.0))
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_scenario_a_network_failures_exhaust_retries() {
    let ctx = context(
        r#"
        [defaults]
        jitter_enabled = false

        [operations.fetch]
        max_attempts = 3
        initial_delay = "10ms"
        "#,
    );
    let work = ScriptedWork::<u32>::always_fail(ScriptedError::Network);

    let err = ctx.execute("fetch", || work.call_async()).await.unwrap_err();

    assert_eq!(err.kind(), ExecutionErrorKind::RetriesExhausted);
    assert_eq!(work.calls(), 3);
    let context = err.context().unwrap();
    assert_eq!(context.kind, ErrorKind::Network);
    assert_eq!(context.attempts, 3);

    let records = ctx.ledger().records_for("fetch");
    assert_eq!(records.len(), 3);
    assert_eq!(
        records.iter().map(|r| r.retry_count).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(records
        .iter()
        .all(|r| r.error_kind == ErrorKind::Network && !r.resolved));
    assert_eq!(err.into_source(), Some(ScriptedError::Network));
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_recovery_marks_resolved() {
    let ctx = context(
        r#"
        [operations.upload]
        max_attempts = 5
        initial_delay = "10ms"
        "#,
    );
    let work = ScriptedWork::fail_then_succeed(2, ScriptedError::Network, "stored");

    let value = ctx.execute("upload", || work.call_async()).await.unwrap();

    assert_eq!(value, "stored");
    assert_eq!(work.calls(), 3);
    let records = ctx.ledger().records_for("upload");
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.resolved
        && r.resolution_note.as_deref() == Some("succeeded on attempt 3")));
    assert_eq!(ctx.breakers().state_of("upload"), Some(CircuitState::Closed));
    assert!(ctx.health_report().recommendations.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_recovery_leaves_earlier_calls_unresolved() {
    let ctx = context(
        r#"
        [operations.upload]
        max_attempts = 1
        "#,
    );
    let failed = ScriptedWork::<()>::always_fail(ScriptedError::Network);
    let _ = ctx.execute("upload", || failed.call_async()).await;

    let recovering = ScriptedWork::fail_then_succeed(1, ScriptedError::Network, ());
    ctx.execute_with("upload", Some(RetryPolicy::default()), || recovering.call_async())
        .await
        .unwrap();

    let records = ctx.ledger().records_for("upload");
    assert_eq!(records.len(), 2);
    assert!(!records[0].resolved);
    assert!(records[1].resolved);
}

#[test]
fn test_ledger_retention_follows_config() {
    let ctx = context(
        r#"
        [defaults]
        ledger_retention_window = "1h"
        "#,
    );
    let ledger = ctx.ledger();
    assert_eq!(ledger.retention(), Some(Duration::from_secs(3600)));

    ledger.append(
        FailureRecord::new("reports", ErrorKind::Timeout, "stale", 0)
            .with_timestamp(chrono::Utc::now() - chrono::TimeDelta::hours(3)),
    );
    for _ in 1..rec_ledger::PRUNE_INTERVAL {
        ledger.record("reports", "upstream timed out", None, ErrorKind::Timeout, 0);
    }

    let records = ledger.records_for("reports");
    assert_eq!(
        records.len(),
        usize::try_from(rec_ledger::PRUNE_INTERVAL).unwrap() - 1
    );
    assert!(records.iter().all(|r| r.message != "stale"));

    ledger.append(
        FailureRecord::new("reports", ErrorKind::Timeout, "stale", 0)
            .with_timestamp(chrono::Utc::now() - chrono::TimeDelta::hours(3)),
    );
    assert_eq!(ctx.prune_ledger(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_open_breaker_short_circuits() {
    let ctx = context(
        r#"
        [operations.flaky]
        failure_threshold = 3
        "#,
    );
    let failing = ScriptedWork::<()>::always_fail(ScriptedError::opaque());

    for _ in 0..3 {
        let err = ctx.execute("flaky", || failing.call_async()).await.unwrap_err();
        assert_eq!(err.kind(), ExecutionErrorKind::RetriesExhausted);
        assert_eq!(err.context().unwrap().kind, ErrorKind::Unknown);
    }
    assert_eq!(failing.calls(), 3);
    assert_eq!(ctx.breakers().state_of("flaky"), Some(CircuitState::Open));

    let fresh = ScriptedWork::new(vec![Ok(())]);
    let err = ctx.execute("flaky", || fresh.call_async()).await.unwrap_err();
    assert_eq!(err.kind(), ExecutionErrorKind::CircuitOpen);
    assert_eq!(fresh.calls(), 0);
    assert_eq!(ctx.ledger().records_for("flaky").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_tokio_timeout_is_classified_as_timeout() {
    let ctx = context("");

    let err = ctx
        .execute("slow-rpc", || {
            tokio::time::timeout(Duration::from_millis(5), std::future::pending::<()>())
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ExecutionErrorKind::RetriesExhausted);
    let context = err.context().unwrap();
    assert_eq!(context.kind, ErrorKind::Timeout);
    assert_eq!(context.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_permission_failure_runs_work_once() {
    let ctx = context("");
    let work = ScriptedWork::<()>::always_fail(ScriptedError::Permission);

    let err = ctx.execute("admin", || work.call_async()).await.unwrap_err();

    assert_eq!(err.kind(), ExecutionErrorKind::NonRetryable);
    assert_eq!(work.calls(), 1);
    assert_eq!(err.context().unwrap().kind, ErrorKind::Permission);
    assert_eq!(ctx.ledger().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opening_mid_sequence() {
    let ctx = context(
        r#"
        [operations.payments]
        failure_threshold = 2
        initial_delay = "10ms"
        "#,
    );
    let work = ScriptedWork::<()>::always_fail(ScriptedError::Network);

    let err = ctx.execute("payments", || work.call_async()).await.unwrap_err();

    assert!(err.is_circuit_open());
    assert_eq!(err.attempts(), 2);
    assert_eq!(work.calls(), 2);
    assert_eq!(err.source_error(), Some(&ScriptedError::Network));
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_runs_work_once() {
    let ctx = context(
        r#"
        [operations.search]
        failure_threshold = 1
        recovery_timeout = "5s"
        "#,
    );
    let denied = ScriptedWork::<u8>::always_fail(ScriptedError::Permission);
    assert!(ctx.execute("search", || denied.call_async()).await.is_err());
    assert_eq!(ctx.breakers().state_of("search"), Some(CircuitState::Open));

    let early = ScriptedWork::new(vec![Ok(1u8)]);
    let err = ctx.execute("search", || early.call_async()).await.unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::CircuitOpen { retry_after: Some(_), attempts: 0, .. }
    ));
    assert_eq!(early.calls(), 0);

    tokio::time::advance(Duration::from_secs(6)).await;

    let probe = ScriptedWork::new(vec![Ok(2u8)]);
    assert_eq!(ctx.execute("search", || probe.call_async()).await.unwrap(), 2);
    assert_eq!(probe.calls(), 1);
    assert_eq!(ctx.breakers().state_of("search"), Some(CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens() {
    let ctx = context(
        r#"
        [operations.index]
        failure_threshold = 1
        recovery_timeout = "5s"
        "#,
    );
    let work = ScriptedWork::<()>::always_fail(ScriptedError::opaque());
    assert!(ctx.execute("index", || work.call_async()).await.is_err());

    tokio::time::advance(Duration::from_secs(6)).await;
    let err = ctx.execute("index", || work.call_async()).await.unwrap_err();
    assert_eq!(err.kind(), ExecutionErrorKind::RetriesExhausted);
    assert_eq!(work.calls(), 2);
    assert_eq!(ctx.breakers().state_of("index"), Some(CircuitState::Open));
}

#[tokio::test(start_paused = true)]
async fn test_health_report_is_idempotent() {
    let ctx = context(
        r#"
        [defaults]
        recommendation_threshold = 2

        [operations.reports]
        failure_threshold = 1
        "#,
    );
    let denied = ScriptedWork::<()>::always_fail(ScriptedError::Permission);
    for _ in 0..2 {
        let _ = ctx.execute("reports", || denied.call_async()).await;
    }
    let ok = ScriptedWork::new(vec![Ok(())]);
    ctx.execute("status", || ok.call_async()).await.unwrap();

    let first = ctx.health_report();
    let second = ctx.health_report();
    assert_eq!(first, second);

    // second call was rejected before running, so only one failure exists
    assert_eq!(first.error_patterns_window.get(&ErrorKind::Permission), Some(&1));
    assert_eq!(first.breaker_states["reports"], "open");
    assert_eq!(first.breaker_states["status"], "closed");
    assert_eq!(first.open_circuits().collect::<Vec<_>>(), vec!["reports"]);
    assert_eq!(first.recommendations.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_backoff_is_not_recorded() {
    let ctx = context(
        r#"
        [operations.slow]
        initial_delay = "30s"
        "#,
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });
    let work = ScriptedWork::<()>::always_fail(ScriptedError::Timeout);

    let err = ctx
        .execute_cancellable("slow", None, &cancel, || work.call_async())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ExecutionErrorKind::Cancelled);
    assert_eq!(err.attempts(), 1);
    assert_eq!(work.calls(), 1);
    assert_eq!(ctx.ledger().len(), 1);
    assert_eq!(err.into_source(), Some(ScriptedError::Timeout));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_never_runs_work() {
    let ctx = context("");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let work = ScriptedWork::new(vec![Ok(1u8)]);

    let err = ctx
        .execute_cancellable("anything", None, &cancel, || work.call_async())
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutionError::Cancelled { attempts: 0, last_error: None, .. }));
    assert_eq!(work.calls(), 0);
    assert!(ctx.ledger().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_policy_precedence() {
    let ctx = context(
        r#"
        [kinds.network]
        max_attempts = 4
        initial_delay = "10ms"

        [operations.billing]
        max_attempts = 2
        failure_threshold = 100
        "#,
    );

    let kind_level = ScriptedWork::<()>::always_fail(ScriptedError::Network);
    let _ = ctx.execute("catalog", || kind_level.call_async()).await;
    assert_eq!(kind_level.calls(), 4);

    let operation_level = ScriptedWork::<()>::always_fail(ScriptedError::Network);
    let _ = ctx.execute("billing", || operation_level.call_async()).await;
    assert_eq!(operation_level.calls(), 2);

    let explicit = RetryPolicy::new(
        3,
        Duration::from_millis(1),
        Duration::from_millis(1),
        1.0,
        false,
    )
    .unwrap();
    let overridden = ScriptedWork::<()>::always_fail(ScriptedError::Network);
    let _ = ctx
        .execute_with("billing", Some(explicit), || overridden.call_async())
        .await;
    assert_eq!(overridden.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_elapsed_follows_policy() {
    let ctx = context(
        r#"
        [defaults]
        jitter_enabled = false

        [operations.timed]
        max_attempts = 3
        "#,
    );
    let work = ScriptedWork::<()>::always_fail(ScriptedError::Network);

    let err = ctx.execute("timed", || work.call_async()).await.unwrap_err();

    // network backoff: 2s then 4s
    let elapsed = err.context().unwrap().total_elapsed;
    assert!(elapsed >= Duration::from_secs(6), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(7), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_admin_overrides() {
    let ctx = context("");
    ctx.force_state("maintenance", CircuitState::Open);

    let work = ScriptedWork::new(vec![Ok(())]);
    assert!(ctx
        .execute("maintenance", || work.call_async())
        .await
        .unwrap_err()
        .is_circuit_open());
    assert_eq!(work.calls(), 0);

    assert!(ctx.invalidate_breaker("maintenance"));
    ctx.execute("maintenance", || work.call_async()).await.unwrap();
    assert_eq!(work.calls(), 1);
    assert!(!ctx.invalidate_breaker("never-used"));
}

#[tokio::test]
async fn test_durable_ledger_across_contexts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("failures.jsonl");

    {
        let ctx = ResilienceContext::builder()
            .ledger_path(&path)
            .build()
            .unwrap();
        let work = ScriptedWork::<()>::always_fail(ScriptedError::Permission);
        let _ = ctx.execute("vault", || work.call_async()).await;
        ctx.ledger().flush().unwrap();
    }

    let ledger = FailureLedger::open_jsonl(&path).unwrap();
    let records = ledger.records_for("vault");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_kind, ErrorKind::Permission);
    assert!(records[0].stack_trace.as_deref().unwrap().contains("Permission"));
}

#[test]
fn test_invalid_operation_policy_rejected_at_build() {
    let config: ResilienceConfig = toml::from_str(
        r#"
        [kinds.network]
        max_delay = "5s"
        initial_delay = "1s"

        [operations.sync]
        initial_delay = "30s"
        "#,
    )
    .unwrap();

    assert!(ResilienceContext::builder().config(config).build().is_err());
}
