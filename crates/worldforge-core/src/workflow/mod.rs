//! Workflow orchestrator: nine workflow kinds composed into a recoverable
//! fan-out pipeline.
//!
//! Workflow functions are deterministic over their task document and the
//! results of their activities: no clocks, no randomness, no direct I/O.
//! All external effects go through [`WorkflowCtx`], whose operations run as
//! activities with explicit queues, timeouts and retry policies. Child
//! workflows are *detached*: scheduling one means writing a pending task
//! document, so a child survives its parent and any single worker process.
//!
//! **Layer rules:**
//! - Workflow modules MAY read their input and call `WorkflowCtx` operations.
//! - Workflow modules MUST NOT touch `Storage`, the clients or the network
//!   directly.
//! - Only `worker` claims tasks and records their terminal status.

pub mod activity;
pub mod batch;
pub mod character;
pub mod character_avatar;
pub mod character_batch;
pub mod ctx;
pub mod init_world;
pub mod post;
pub mod post_batch;
pub mod post_image;
pub mod worker;
pub mod world_description;
pub mod world_image;

use mongodb::bson::Document;

use crate::error::{ImageError, LlmError, ServiceError, StorageError};

pub use ctx::WorkflowCtx;
pub use worker::Worker;

/// The only thing workflows pass to each other: a pointer to a task
/// document holding the full input payload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskRef {
    pub task_id: String,
}

/// Errors from workflow operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Document-store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// LLM failure.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Image-pipeline failure.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Downstream-service failure.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// An activity exceeded its start-to-close timeout.
    #[error("activity '{activity}' timed out after {seconds}s")]
    ActivityTimeout {
        activity: &'static str,
        seconds: u64,
    },

    /// The world has no stored parameters yet; nothing downstream can run.
    #[error("world parameters not found for world {world_id}")]
    MissingWorldParameters { world_id: String },

    /// A referenced task document does not exist.
    #[error("task {task_id} not found")]
    TaskNotFound { task_id: String },

    /// The workflow input fails a precondition.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Retry classes from the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network blips, remote 5xx, timeouts: retry with backoff.
    Transient,
    /// Rate limits and open breakers: fail now, let the outer policy wait.
    RateLimited,
    /// Parse/schema mismatches: model nondeterminism, worth two more tries.
    Validation,
    /// Broken preconditions: retrying cannot help.
    NonRetryable,
}

impl WorkflowError {
    /// Classify for retry decisions at the activity and task level.
    pub fn class(&self) -> ErrorClass {
        match self {
            WorkflowError::Storage(err) => match err {
                StorageError::DuplicateKey { .. }
                | StorageError::NotFound { .. }
                | StorageError::InvalidCounterField { .. }
                | StorageError::Serialize(_)
                | StorageError::Deserialize(_) => ErrorClass::NonRetryable,
                StorageError::Database(_) => ErrorClass::Transient,
            },
            WorkflowError::Llm(err) => match err {
                LlmError::Request(_) | LlmError::MissingField { .. } => ErrorClass::Transient,
                LlmError::Api { status, .. } => {
                    if *status >= 500 {
                        ErrorClass::Transient
                    } else {
                        ErrorClass::NonRetryable
                    }
                }
                LlmError::RateLimited { .. } | LlmError::CircuitOpen(_) => {
                    ErrorClass::RateLimited
                }
                LlmError::Parse(_) | LlmError::Validation { .. } => ErrorClass::Validation,
                LlmError::UnknownSchema(_) => ErrorClass::NonRetryable,
            },
            WorkflowError::Image(err) => match err {
                ImageError::Request(_)
                | ImageError::Download { .. }
                | ImageError::Upload { .. }
                | ImageError::NoImages => ErrorClass::Transient,
                ImageError::Api { status, .. } => {
                    if *status >= 500 {
                        ErrorClass::Transient
                    } else {
                        ErrorClass::NonRetryable
                    }
                }
                ImageError::Service(inner) => classify_service(inner),
                ImageError::CircuitOpen(_) => ErrorClass::RateLimited,
            },
            WorkflowError::Service(err) => classify_service(err),
            WorkflowError::ActivityTimeout { .. } => ErrorClass::Transient,
            WorkflowError::MissingWorldParameters { .. }
            | WorkflowError::TaskNotFound { .. }
            | WorkflowError::InvalidInput(_) => ErrorClass::NonRetryable,
        }
    }
}

fn classify_service(err: &ServiceError) -> ErrorClass {
    match err {
        ServiceError::CircuitOpen(_) => ErrorClass::RateLimited,
        ServiceError::Channel { .. } => ErrorClass::Transient,
        ServiceError::Rpc { status, .. } => match status.code() {
            tonic::Code::Unavailable
            | tonic::Code::DeadlineExceeded
            | tonic::Code::Aborted
            | tonic::Code::Unknown => ErrorClass::Transient,
            tonic::Code::ResourceExhausted => ErrorClass::RateLimited,
            _ => ErrorClass::NonRetryable,
        },
        ServiceError::Rejected { .. } => ErrorClass::NonRetryable,
    }
}

/// Run the workflow matching the claimed task's kind.
pub async fn dispatch(ctx: &WorkflowCtx) -> Result<Document, WorkflowError> {
    use crate::storage::models::TaskKind;

    match ctx.task.kind {
        TaskKind::InitWorldCreation => init_world::run(ctx).await,
        TaskKind::GenerateWorldDescription => world_description::run(ctx).await,
        TaskKind::GenerateWorldImage => world_image::run(ctx).await,
        TaskKind::GenerateCharacterBatch => character_batch::run(ctx).await,
        TaskKind::GenerateCharacter => character::run(ctx).await,
        TaskKind::GenerateCharacterAvatar => character_avatar::run(ctx).await,
        TaskKind::GeneratePostBatch => post_batch::run(ctx).await,
        TaskKind::GeneratePost => post::run(ctx).await,
        TaskKind::GeneratePostImage => post_image::run(ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_are_not_locally_retried() {
        let err = WorkflowError::Llm(LlmError::RateLimited {
            retry_after_secs: 10,
        });
        assert_eq!(err.class(), ErrorClass::RateLimited);

        let err = WorkflowError::Service(ServiceError::CircuitOpen(
            crate::net::breaker::CircuitOpen { name: "llm_content" },
        ));
        assert_eq!(err.class(), ErrorClass::RateLimited);
    }

    #[test]
    fn validation_failures_get_their_own_class() {
        let err = WorkflowError::Llm(LlmError::Parse("bad json".to_string()));
        assert_eq!(err.class(), ErrorClass::Validation);

        let err = WorkflowError::Llm(LlmError::Validation {
            schema: "CharacterBatchResponse".to_string(),
            message: "missing field".to_string(),
        });
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[test]
    fn preconditions_are_non_retryable() {
        let err = WorkflowError::MissingWorldParameters {
            world_id: "w".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::NonRetryable);

        let err = WorkflowError::Llm(LlmError::UnknownSchema("X".to_string()));
        assert_eq!(err.class(), ErrorClass::NonRetryable);
    }

    #[test]
    fn timeouts_and_remote_errors_are_transient() {
        let err = WorkflowError::ActivityTimeout {
            activity: "generate_structured_content",
            seconds: 30,
        };
        assert_eq!(err.class(), ErrorClass::Transient);

        let err = WorkflowError::Llm(LlmError::Api {
            status: 503,
            message: "unavailable".to_string(),
        });
        assert_eq!(err.class(), ErrorClass::Transient);
    }
}
