//! Bounded retries with exponential backoff and jitter.
//!
//! Only transient failures are worth repeating; callers decide what counts
//! as transient through the `retry_if` predicate so that validation errors
//! and open circuit breakers fail fast.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Backoff schedule for one class of operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling applied to every delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// Policy with the library-wide defaults: 2 retries, 1 s initial delay,
    /// doubling up to 60 s.
    pub const fn standard() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }

    pub const fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_factor: 2.0,
        }
    }

    /// Base delay (before jitter) for the given zero-indexed retry.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_factor.powi(retry as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Apply ±10 % jitter so synchronized workers do not retry in lockstep.
fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Run `op` until it succeeds, the policy is exhausted, or `retry_if`
/// declines the error.
///
/// The final error is returned unchanged, so callers keep their typed
/// error enums.
pub async fn with_retries<T, E, Fut>(
    policy: RetryPolicy,
    op_name: &str,
    retry_if: impl Fn(&E) -> bool,
    mut op: impl FnMut() -> Fut,
) -> Result<T, E>
where
    E: std::fmt::Display,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_retries || !retry_if(&err) {
                    if attempt > 0 {
                        tracing::error!(
                            op = op_name,
                            attempts = attempt + 1,
                            error = %err,
                            "all retry attempts exhausted",
                        );
                    }
                    return Err(err);
                }
                let delay = jittered(policy.delay_for(attempt));
                tracing::warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying",
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            backoff_factor: 2.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        // capped from here on
        assert_eq!(policy.delay_for(6), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn succeeds_without_retrying() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            with_retries(RetryPolicy::standard(), "test", |_| true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        tokio::time::pause();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10));
        let fut = with_retries(policy, "test", |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("boom".to_string())
                } else {
                    Ok(n)
                }
            }
        });
        let result = fut.await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        tokio::time::pause();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2));
        let result: Result<(), String> = with_retries(policy, "test", |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("always".to_string()) }
        })
        .await;
        assert_eq!(result.unwrap_err(), "always");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn predicate_stops_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            with_retries(RetryPolicy::standard(), "test", |_| false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            })
            .await;
        assert_eq!(result.unwrap_err(), "fatal");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
