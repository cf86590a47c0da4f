//! Resilient executor
//!
//! Every call runs the same cycle:
//! 1. ask the operation's breaker for a permit (rejection ends the call
//!    without running `work`)
//! 2. run `work`
//! 3. on failure classify, record to the ledger, report to the breaker
//! 4. stop if the failure is not retryable or the budget is spent,
//!    otherwise wait out the backoff and go back to 1
//!
//! [`AttemptLoop`] holds those decisions. The async and blocking entry points
//! only drive it and supply the wait.

use crate::context::{Inner, ResilienceContext};
use crate::error::{ExecutionError, FailureContext};
use rec_breaker::BreakerPermit;
use rec_policy::{ErrorKind, KindPolicies, RetryPolicy};
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Granularity of blocking backoff waits
const BLOCKING_SLICE: Duration = Duration::from_millis(10);

/// What the driver should do after an attempt
#[derive(Debug)]
pub(crate) enum Step<T, E>
where
    E: Error + 'static,
{
    /// Call finished
    Done(Result<T, ExecutionError<E>>),
    /// Wait, then attempt again
    Retry(Duration),
}

/// Decision state for one resilient call
pub(crate) struct AttemptLoop<'a, E>
where
    E: Error + 'static,
{
    inner: &'a Inner,
    operation: &'a str,
    policies: Arc<KindPolicies>,
    policy_override: Option<RetryPolicy>,
    started: Instant,
    attempts: u32,
    last_error: Option<E>,
    recorded: Vec<Uuid>,
}

impl<'a, E> AttemptLoop<'a, E>
where
    E: Error + 'static,
{
    /// Resolve the policy table before any work runs
    pub(crate) fn start(
        inner: &'a Inner,
        operation: &'a str,
        policy_override: Option<RetryPolicy>,
    ) -> Result<Self, ExecutionError<E>> {
        let policies = inner
            .policies_for(operation)
            .map_err(|e| ExecutionError::Internal {
                operation: operation.to_string(),
                message: format!("invalid retry policy: {e}"),
            })?;
        Ok(Self {
            inner,
            operation,
            policies,
            policy_override,
            started: Instant::now(),
            attempts: 0,
            last_error: None,
            recorded: Vec::new(),
        })
    }

    /// Breaker admission for the next attempt
    pub(crate) fn admit(&mut self) -> Result<BreakerPermit, ExecutionError<E>> {
        self.inner.breakers.acquire(self.operation).map_err(|open| {
            metrics::counter!("rec_circuit_rejections_total", "operation" => self.operation.to_string())
                .increment(1);
            tracing::info!(
                operation = self.operation,
                attempts = self.attempts,
                retry_after = ?open.retry_after,
                "circuit open; call rejected"
            );
            ExecutionError::CircuitOpen {
                operation: open.operation,
                retry_after: open.retry_after,
                attempts: self.attempts,
                last_error: self.last_error.take(),
            }
        })
    }

    /// Fold one attempt's outcome into the loop
    pub(crate) fn settle<T>(&mut self, permit: BreakerPermit, outcome: Result<T, E>) -> Step<T, E> {
        self.attempts += 1;
        match outcome {
            Ok(value) => {
                permit.record_success();
                self.succeeded();
                Step::Done(Ok(value))
            }
            Err(error) => {
                let step = self.failed(error);
                permit.record_failure();
                step
            }
        }
    }

    fn succeeded(&mut self) {
        metrics::counter!("rec_executions_total", "operation" => self.operation.to_string(), "outcome" => "success")
            .increment(1);
        if self.attempts > 1 {
            let note = format!("succeeded on attempt {}", self.attempts);
            let resolved = self.inner.ledger.resolve(&self.recorded, Some(&note));
            tracing::info!(
                operation = self.operation,
                attempts = self.attempts,
                resolved,
                "operation recovered"
            );
        } else {
            tracing::debug!(operation = self.operation, "operation succeeded");
        }
    }

    fn failed<T>(&mut self, error: E) -> Step<T, E> {
        let class = self.inner.classifier.classify(&error);
        let kind = class.kind;
        let id = self.inner.ledger.record(
            self.operation,
            &class.message,
            Some(format!("{error:?}")),
            kind,
            self.attempts - 1,
        );
        self.recorded.push(id);
        metrics::counter!("rec_failures_total", "operation" => self.operation.to_string(), "kind" => kind.as_str())
            .increment(1);

        if !class.retryable {
            tracing::info!(
                operation = self.operation,
                attempt = self.attempts,
                %kind,
                "non-retryable failure"
            );
            return self.terminal(kind, error, false);
        }

        let policy = self.policy_for(kind);
        if self.attempts >= policy.max_attempts() {
            tracing::info!(
                operation = self.operation,
                attempts = self.attempts,
                %kind,
                "retries exhausted"
            );
            return self.terminal(kind, error, true);
        }

        let delay = policy.delay_for(self.attempts - 1, self.inner.jitter.as_ref());
        tracing::debug!(
            operation = self.operation,
            attempt = self.attempts,
            %kind,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "attempt failed; backing off"
        );
        self.last_error = Some(error);
        Step::Retry(delay)
    }

    fn policy_for(&self, kind: ErrorKind) -> RetryPolicy {
        self.policy_override
            .unwrap_or_else(|| *self.policies.get(kind))
    }

    fn terminal<T>(&self, kind: ErrorKind, source: E, exhausted: bool) -> Step<T, E> {
        let outcome = if exhausted { "retries_exhausted" } else { "non_retryable" };
        metrics::counter!("rec_executions_total", "operation" => self.operation.to_string(), "outcome" => outcome)
            .increment(1);
        let context = FailureContext {
            operation: self.operation.to_string(),
            kind,
            attempts: self.attempts,
            total_elapsed: self.started.elapsed(),
        };
        Step::Done(Err(if exhausted {
            ExecutionError::RetriesExhausted { context, source }
        } else {
            ExecutionError::NonRetryable { context, source }
        }))
    }

    /// Cancellation observed; nothing is recorded
    pub(crate) fn cancelled(mut self) -> ExecutionError<E> {
        metrics::counter!("rec_executions_total", "operation" => self.operation.to_string(), "outcome" => "cancelled")
            .increment(1);
        tracing::info!(
            operation = self.operation,
            attempts = self.attempts,
            "execution cancelled"
        );
        ExecutionError::Cancelled {
            operation: self.operation.to_string(),
            attempts: self.attempts,
            last_error: self.last_error.take(),
        }
    }
}

impl ResilienceContext {
    /// Run `work` under `operation`'s breaker with classified retries
    ///
    /// # Errors
    /// See [`ExecutionError`].
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: &str,
        work: F,
    ) -> Result<T, ExecutionError<E>>
    where
        E: Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(operation, None, work).await
    }

    /// [`execute`](Self::execute) with an explicit policy that overrides
    /// configuration and kind defaults
    ///
    /// # Errors
    /// See [`ExecutionError`].
    pub async fn execute_with<T, E, F, Fut>(
        &self,
        operation: &str,
        policy_override: Option<RetryPolicy>,
        work: F,
    ) -> Result<T, ExecutionError<E>>
    where
        E: Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let never = CancellationToken::new();
        self.execute_cancellable(operation, policy_override, &never, work)
            .await
    }

    /// [`execute_with`](Self::execute_with) that stops waiting when `cancel`
    /// fires
    ///
    /// Cancellation is checked before every attempt and raced against each
    /// backoff wait. An attempt already running is allowed to finish.
    ///
    /// # Errors
    /// See [`ExecutionError`].
    pub async fn execute_cancellable<T, E, F, Fut>(
        &self,
        operation: &str,
        policy_override: Option<RetryPolicy>,
        cancel: &CancellationToken,
        mut work: F,
    ) -> Result<T, ExecutionError<E>>
    where
        E: Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let span = tracing::info_span!("execute", operation);
        async move {
            let mut run = AttemptLoop::start(&self.inner, operation, policy_override)?;
            loop {
                if cancel.is_cancelled() {
                    return Err(run.cancelled());
                }
                let permit = run.admit()?;
                let outcome = work().await;
                match run.settle(permit, outcome) {
                    Step::Done(result) => return result,
                    Step::Retry(delay) => {
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = cancel.cancelled() => return Err(run.cancelled()),
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Blocking variant for worker threads
    ///
    /// Backoff waits sleep the current thread in short slices so `cancel` is
    /// observed promptly. Must not be called from an async task.
    ///
    /// # Errors
    /// See [`ExecutionError`].
    pub fn execute_blocking<T, E, F>(
        &self,
        operation: &str,
        policy_override: Option<RetryPolicy>,
        cancel: Option<&CancellationToken>,
        mut work: F,
    ) -> Result<T, ExecutionError<E>>
    where
        E: Error + 'static,
        F: FnMut() -> Result<T, E>,
    {
        let span = tracing::info_span!("execute", operation);
        let _entered = span.enter();
        let mut run = AttemptLoop::start(&self.inner, operation, policy_override)?;
        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(run.cancelled());
            }
            let permit = run.admit()?;
            let outcome = work();
            match run.settle(permit, outcome) {
                Step::Done(result) => return result,
                Step::Retry(delay) => {
                    if !sleep_blocking(delay, cancel) {
                        return Err(run.cancelled());
                    }
                }
            }
        }
    }
}

/// Sleep for `delay`; `false` if cancelled first
fn sleep_blocking(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
    let Some(cancel) = cancel else {
        std::thread::sleep(delay);
        return true;
    };
    let deadline = std::time::Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = std::time::Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(BLOCKING_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rec_policy::FixedJitter;
    use rec_test_utils::{ScriptedError, ScriptedWork};

    fn context() -> ResilienceContext {
        ResilienceContext::builder()
            .jitter(FixedJitter::new(0.0))
            .build()
            .unwrap()
    }

    #[test]
    fn test_loop_records_retry_counts() {
        let ctx = context();
        let policy = RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(1),
            1.0,
            false,
        )
        .unwrap();
        let mut run: AttemptLoop<'_, ScriptedError> =
            AttemptLoop::start(&ctx.inner, "op", Some(policy)).unwrap();

        for expected in 0..2 {
            let permit = run.admit().unwrap();
            let step = run.settle::<()>(permit, Err(ScriptedError::Network));
            assert!(matches!(step, Step::Retry(d) if d == Duration::from_millis(1)));
            let records = ctx.ledger().records_for("op");
            assert_eq!(records.last().unwrap().retry_count, expected);
        }
        let permit = run.admit().unwrap();
        let Step::Done(Err(err)) = run.settle::<()>(permit, Err(ScriptedError::Network)) else {
            panic!("expected exhaustion");
        };
        assert_eq!(err.attempts(), 3);
        assert_eq!(ctx.ledger().len(), 3);
    }

    #[test]
    fn test_blocking_cancel_during_backoff() {
        let ctx = context();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let work = ScriptedWork::<u8>::always_fail(ScriptedError::Network);
        let calls = work.clone();

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });
        let long = RetryPolicy::new(5, Duration::from_secs(30), Duration::from_secs(30), 1.0, false)
            .unwrap();
        let started = std::time::Instant::now();
        let result = ctx.execute_blocking("op", Some(long), Some(&cancel), || work.call());
        canceller.join().unwrap();

        assert!(matches!(result, Err(ExecutionError::Cancelled { attempts: 1, .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(calls.calls(), 1);
        assert_eq!(ctx.ledger().len(), 1);
    }

    #[test]
    fn test_sleep_blocking_without_token() {
        assert!(sleep_blocking(Duration::from_millis(1), None));
    }
}
