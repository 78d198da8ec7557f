//! Circuit breaker protecting callers from services that are already down.
//!
//! Classic three-state breaker: `Closed` counts consecutive failures and
//! opens at a threshold; `Open` short-circuits until the recovery timeout
//! elapses; `HalfOpen` lets probes through and closes again after enough
//! consecutive successes. One breaker per logical dependency
//! (`character_service`, `llm_content`, ...).

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Returned when a call is refused because the breaker is open.
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit breaker '{name}' is open")]
pub struct CircuitOpen {
    /// Breaker identifier.
    pub name: &'static str,
}

/// Breaker state, exposed for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
}

/// A three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    recovery_timeout: Duration,
    recovery_threshold: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(
        name: &'static str,
        failure_threshold: u32,
        recovery_timeout: Duration,
        recovery_threshold: u32,
    ) -> Self {
        Self {
            name,
            failure_threshold,
            recovery_timeout,
            recovery_threshold,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Breaker with the failure/recovery settings used for all downstream
    /// dependencies: 3 failures to open, 60 s recovery, 2 successes to close.
    pub fn standard(name: &'static str) -> Self {
        Self::new(name, 3, Duration::from_secs(60), 2)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current state (transitions `Open → HalfOpen` if the timeout elapsed).
    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Ask permission to make a call.
    ///
    /// `Err(CircuitOpen)` short-circuits immediately; callers must not retry
    /// locally around it.
    pub fn try_acquire(&self) -> Result<(), CircuitOpen> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state == BreakerState::Open {
            let recovered = inner
                .last_failure_at
                .is_some_and(|at| at.elapsed() >= self.recovery_timeout);
            if recovered {
                tracing::info!(breaker = self.name, "transitioning to half-open");
                inner.state = BreakerState::HalfOpen;
                inner.success_count = 0;
            } else {
                return Err(CircuitOpen { name: self.name });
            }
        }
        Ok(())
    }

    /// Record the outcome of a permitted call.
    pub fn record(&self, success: bool) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if success {
            match inner.state {
                BreakerState::HalfOpen => {
                    inner.success_count += 1;
                    if inner.success_count >= self.recovery_threshold {
                        tracing::info!(breaker = self.name, "recovered, closing");
                        inner.state = BreakerState::Closed;
                        inner.failure_count = 0;
                        inner.success_count = 0;
                    }
                }
                BreakerState::Closed => inner.failure_count = 0,
                BreakerState::Open => {}
            }
        } else {
            inner.last_failure_at = Some(Instant::now());
            match inner.state {
                BreakerState::Closed => {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.failure_threshold {
                        tracing::warn!(
                            breaker = self.name,
                            failures = inner.failure_count,
                            "opening after repeated failures",
                        );
                        inner.state = BreakerState::Open;
                    }
                }
                BreakerState::HalfOpen => {
                    tracing::warn!(breaker = self.name, "probe failed, reopening");
                    inner.state = BreakerState::Open;
                }
                BreakerState::Open => {}
            }
        }
    }

    /// Run `op` under the breaker, recording its outcome.
    pub async fn call<T, E, Fut>(&self, op: impl FnOnce() -> Fut) -> Result<T, E>
    where
        E: From<CircuitOpen>,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.try_acquire()?;
        let result = op().await;
        self.record(result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new("test", 3, recovery, 2)
    }

    #[test]
    fn opens_after_threshold_failures() {
        let b = breaker(Duration::from_secs(60));
        b.record(false);
        b.record(false);
        assert_eq!(b.state(), BreakerState::Closed);
        b.record(false);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.try_acquire().is_err());
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let b = breaker(Duration::from_secs(60));
        b.record(false);
        b.record(false);
        b.record(true);
        b.record(false);
        b.record(false);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_after_recovery_timeout() {
        let b = breaker(Duration::ZERO);
        for _ in 0..3 {
            b.record(false);
        }
        assert_eq!(b.state(), BreakerState::Open);
        // Zero recovery timeout: the next acquire flips to half-open.
        assert!(b.try_acquire().is_ok());
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn closes_after_enough_half_open_successes() {
        let b = breaker(Duration::ZERO);
        for _ in 0..3 {
            b.record(false);
        }
        assert!(b.try_acquire().is_ok());
        b.record(true);
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record(true);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let b = breaker(Duration::ZERO);
        for _ in 0..3 {
            b.record(false);
        }
        assert!(b.try_acquire().is_ok());
        b.record(false);
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn call_short_circuits_when_open() {
        #[derive(Debug, thiserror::Error)]
        enum TestError {
            #[error(transparent)]
            Open(#[from] CircuitOpen),
            #[error("op failed")]
            Op,
        }

        let b = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            let _: Result<(), TestError> = b.call(|| async { Err(TestError::Op) }).await;
        }
        let result: Result<(), TestError> = b.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(TestError::Open(_))));
    }
}
