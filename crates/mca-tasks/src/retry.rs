//! Retry with exponential backoff.
//!
//! Only [`TaskError::Failed`] is retried. Cancellation and panics end the
//! loop immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TaskError;
use crate::handle::TaskContext;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (`0.0..=1.0`).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the jitter fraction.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms.max(0.0) as u64)
    }

    /// [`RetryPolicy::delay_for_retry`] scaled by a jitter multiplier in
    /// `[1 - jitter, 1 + jitter]`, chosen by `random` in `0.0..=1.0`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn jittered_delay(&self, retry: u32, random: f64) -> Duration {
        let base = self.delay_for_retry(retry);
        if self.jitter <= 0.0 {
            return base;
        }
        let random = random.clamp(0.0, 1.0);
        let factor = 1.0 - self.jitter + 2.0 * self.jitter * random;
        Duration::from_millis((base.as_millis() as f64 * factor).max(0.0) as u64)
    }

    fn next_delay(&self, retry: u32) -> Duration {
        self.jittered_delay(retry, rand::thread_rng().r#gen::<f64>())
    }

    fn should_retry(&self, attempt: u32, error: &TaskError) -> bool {
        matches!(error, TaskError::Failed(_)) && attempt < self.max_attempts.max(1)
    }

    /// Run `op` inside a work body, sleeping between attempts on the worker
    /// thread. `op` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted, or
    /// [`TaskError::Cancelled`] as soon as cancellation is observed.
    pub fn run<T, F>(&self, ctx: &TaskContext, mut op: F) -> Result<T, TaskError>
    where
        F: FnMut(u32) -> Result<T, TaskError>,
    {
        let mut attempt: u32 = 1;
        loop {
            ctx.checkpoint()?;
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(attempt, &e) => {
                    let delay = self.next_delay(attempt);
                    debug!(attempt, delay_ms = delay.as_millis(), error = %e, "Retrying");
                    ctx.sleep(delay)?;
                    attempt = attempt.saturating_add(1);
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Async variant of [`RetryPolicy::run`], cancelled through `token`.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted, or
    /// [`TaskError::Cancelled`] if `token` fires.
    pub async fn run_async<T, F, Fut>(&self, token: &CancellationToken, mut op: F) -> Result<T, TaskError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            if token.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(attempt, &e) => {
                    let delay = self.next_delay(attempt);
                    debug!(attempt, delay_ms = delay.as_millis(), error = %e, "Retrying");
                    tokio::select! {
                        () = token.cancelled() => return Err(TaskError::Cancelled),
                        () = tokio::time::sleep(delay) => {},
                    }
                    attempt = attempt.saturating_add(1);
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TaskExecutor;
    use crate::state::TaskState;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(200));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_retry(0), Duration::ZERO);
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_retry(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::default();
        let low = policy.jittered_delay(1, 0.0).as_millis();
        let high = policy.jittered_delay(1, 1.0).as_millis();
        assert!((159..=160).contains(&low), "low = {low}");
        assert!((239..=240).contains(&high), "high = {high}");
        assert_eq!(policy.clone().with_jitter(0.0).jittered_delay(1, 1.0), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_async_retries_until_success() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result = fast()
            .run_async(&token, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(TaskError::failed("transient"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_async_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), _> = fast()
            .run_async(&token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TaskError::failed("down")) }
            })
            .await;
        assert_eq!(result, Err(TaskError::failed("down")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_is_never_retried() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), _> = fast()
            .run_async(&token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TaskError::Cancelled) }
            })
            .await;
        assert_eq!(result, Err(TaskError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sync_run_inside_task() {
        let executor = TaskExecutor::new(1).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);

        let handle = executor.submit(
            move |ctx| {
                fast().run(ctx, |attempt| {
                    s.lock().unwrap().push(attempt);
                    if attempt == 1 {
                        Err(TaskError::failed("first try"))
                    } else {
                        Ok(())
                    }
                })
            },
            |_| {},
        );
        assert_eq!(handle.wait().await, TaskState::Completed);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
