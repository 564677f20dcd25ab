//! Retry combinator shared by every external call site.
//!
//! One policy type parameterizes `(max attempts, base delay, multiplier,
//! jitter)`; the retryable set is fixed by `ErrorKind::is_retryable`. The
//! orchestrator's stage loops, the LLM invoker, and the market adapters all
//! go through here rather than carrying their own loops.

use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy for an external call site.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. 1 means no retries.
    pub max_attempts: u32,
    /// Base delay used for exponential backoff.
    pub base_delay: Duration,
    /// Backoff multiplier applied per retry attempt.
    pub multiplier: f64,
    /// Jitter fraction in [0, 1]; each delay is scaled by a uniform factor
    /// in [1 - jitter, 1 + jitter].
    pub jitter: f64,
}

impl RetryPolicy {
    /// Policy used by the orchestrator's stage loops: 2 retries, 2 s base,
    /// multiplier 2.0, jitter up to 20%.
    pub fn stage() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }

    /// Policy for the Aggregate stage: a single retry, 2 s delay.
    pub fn aggregate() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Policy for LLM calls: `max_retries` retries over `base_delay_ms`,
    /// multiplier 2.0, jitter up to 20%.
    pub fn llm(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            base_delay: Duration::from_millis(base_delay_ms),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }

    /// Policy for market-adapter calls: 2 retries on transient failure.
    pub fn adapter() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }

    /// Delay before the retry following `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt as i32);
        let base = self.base_delay.as_millis() as f64 * factor;
        let scaled = if self.jitter > 0.0 {
            let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            base * (1.0 + spread)
        } else {
            base
        };
        Duration::from_millis(scaled.round().max(0.0) as u64)
    }
}

/// Outcome of a retried operation, carrying the attempt count for telemetry.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final result after the last attempt.
    pub result: Result<T>,
    /// Attempts actually made (>= 1).
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    /// Discard the attempt count.
    pub fn into_result(self) -> Result<T> {
        self.result
    }
}

/// Run `operation` under `policy`, retrying on retryable errors only.
///
/// The operation receives the 0-based attempt index. Non-retryable errors
/// short-circuit immediately; the last error is returned once the budget is
/// exhausted.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                }
            }
            Err(error) => {
                let budget_left = attempt + 1 < policy.max_attempts;
                if !budget_left || !error.is_retryable() {
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt + 1,
                    };
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after transient failure"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Run `operation` with a hard deadline, mapping elapse to `DeadlineExceeded`.
pub async fn with_deadline<T, Fut>(deadline: Duration, operation: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => Err(Error::deadline_exceeded(deadline.as_millis() as u64)),
    }
}
