//! Activity execution: the unit of retry and durability.
//!
//! Every external effect a workflow performs runs through [`run_activity`],
//! which routes it to a task queue, bounds it with a start-to-close timeout,
//! and applies the per-class retry policy. Exceeding the timeout counts as
//! a retryable failure; the error taxonomy decides everything else.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::{ErrorClass, WorkflowError};
use crate::net::retry::RetryPolicy;
use crate::resources::ResourcePool;

/// Queues separating slow activity classes from fast ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskQueue {
    Main,
    Llm,
    Images,
    Progress,
    Services,
}

impl TaskQueue {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskQueue::Main => "main",
            TaskQueue::Llm => "llm",
            TaskQueue::Images => "images",
            TaskQueue::Progress => "progress",
            TaskQueue::Services => "services",
        }
    }
}

/// Execution parameters for one activity class.
#[derive(Debug, Clone, Copy)]
pub struct ActivityOptions {
    pub name: &'static str,
    pub queue: TaskQueue,
    pub start_to_close: Duration,
    pub retry: RetryPolicy,
}

impl ActivityOptions {
    /// Ledger and task-store writes: quick, 3 attempts.
    pub const fn progress(name: &'static str) -> Self {
        Self {
            name,
            queue: TaskQueue::Progress,
            start_to_close: Duration::from_secs(30),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(30)),
        }
    }

    /// Parameter loads and other local reads: quick, 3 attempts.
    pub const fn main(name: &'static str) -> Self {
        Self {
            name,
            queue: TaskQueue::Main,
            start_to_close: Duration::from_secs(30),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(30)),
        }
    }

    /// Downstream gRPC writes: quick timeout, 3 attempts.
    pub const fn services(name: &'static str) -> Self {
        Self {
            name,
            queue: TaskQueue::Services,
            start_to_close: Duration::from_secs(30),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(60)),
        }
    }

    /// LLM completions: long timeouts, per-call attempt budgets.
    pub const fn llm(
        name: &'static str,
        timeout_secs: u64,
        max_attempts: u32,
        initial_secs: u64,
        max_interval_secs: u64,
    ) -> Self {
        Self {
            name,
            queue: TaskQueue::Llm,
            start_to_close: Duration::from_secs(timeout_secs),
            retry: RetryPolicy::new(
                max_attempts - 1,
                Duration::from_secs(initial_secs),
                Duration::from_secs(max_interval_secs),
            ),
        }
    }

    /// Image generation and upload: 5 minutes, 3 attempts.
    pub const fn images(name: &'static str) -> Self {
        Self {
            name,
            queue: TaskQueue::Images,
            start_to_close: Duration::from_secs(300),
            retry: RetryPolicy::new(2, Duration::from_secs(5), Duration::from_secs(120)),
        }
    }
}

/// How many retries a class allows under a given policy.
///
/// Validation failures are capped at two local retries regardless of the
/// policy; rate limits and broken preconditions get none.
pub fn retries_for(class: ErrorClass, policy: RetryPolicy) -> u32 {
    match class {
        ErrorClass::Transient => policy.max_retries,
        ErrorClass::Validation => policy.max_retries.min(2),
        ErrorClass::RateLimited | ErrorClass::NonRetryable => 0,
    }
}

/// Run one activity with timeout and classified retries.
pub async fn run_activity<T, Fut>(
    pool: &ResourcePool,
    options: ActivityOptions,
    mut op: impl FnMut() -> Fut,
) -> Result<T, WorkflowError>
where
    Fut: Future<Output = Result<T, WorkflowError>>,
{
    let _permit = pool
        .activity_permits
        .clone()
        .acquire_owned()
        .await
        .expect("activity permit semaphore closed");

    let mut attempt = 0u32;
    loop {
        let result = match tokio::time::timeout(options.start_to_close, op()).await {
            Ok(result) => result,
            Err(_) => Err(WorkflowError::ActivityTimeout {
                activity: options.name,
                seconds: options.start_to_close.as_secs(),
            }),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                let class = err.class();
                if attempt >= retries_for(class, options.retry) {
                    tracing::error!(
                        activity = options.name,
                        queue = options.queue.as_str(),
                        attempts = attempt + 1,
                        class = ?class,
                        error = %err,
                        "activity failed",
                    );
                    return Err(err);
                }
                let base = options.retry.delay_for(attempt);
                let jitter = rand::thread_rng().gen_range(0.9..=1.1);
                let delay = Duration::from_secs_f64(base.as_secs_f64() * jitter);
                tracing::warn!(
                    activity = options.name,
                    queue = options.queue.as_str(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "activity attempt failed, retrying",
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
    use crate::error::LlmError;

    #[test]
    fn transient_uses_full_policy() {
        let policy = RetryPolicy::new(4, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(retries_for(ErrorClass::Transient, policy), 4);
    }

    #[test]
    fn validation_is_capped_at_two() {
        let policy = RetryPolicy::new(4, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(retries_for(ErrorClass::Validation, policy), 2);

        let tight = RetryPolicy::new(1, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(retries_for(ErrorClass::Validation, tight), 1);
    }

    #[test]
    fn rate_limited_and_non_retryable_get_nothing() {
        let policy = RetryPolicy::new(4, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(retries_for(ErrorClass::RateLimited, policy), 0);
        assert_eq!(retries_for(ErrorClass::NonRetryable, policy), 0);
    }

    #[test]
    fn llm_options_translate_attempts_to_retries() {
        let options = ActivityOptions::llm("generate_structured_content", 600, 3, 3, 180);
        assert_eq!(options.retry.max_retries, 2);
        assert_eq!(options.start_to_close, Duration::from_secs(600));
        assert_eq!(options.queue, TaskQueue::Llm);
    }

    #[test]
    fn error_classes_match_taxonomy_for_llm() {
        let err = WorkflowError::Llm(LlmError::Api {
            status: 429,
            message: String::new(),
        });
        // 429 arrives as RateLimited, not Api; a 4xx Api error is permanent.
        assert_eq!(err.class(), ErrorClass::NonRetryable);
    }
}
