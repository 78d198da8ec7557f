//! Worker: claims pending tasks and drives their workflows.
//!
//! Many workers may poll the same task collection; the atomic claim makes
//! that safe. A claimed task runs to a terminal status: `completed` with a
//! result document, `failed` with an error, or back to `pending` when the
//! failure class is retryable and the per-kind attempt budget is not yet
//! spent. Shutdown stops claiming and drains in-flight workflows.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use super::{dispatch, ErrorClass, WorkflowCtx};
use crate::resources::ResourcePool;
use crate::storage::models::{GenerationState, Stage, Task, TaskKind, TaskStatus};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Attempt budget per task kind.
///
/// Root kinds get more attempts because everything downstream depends on
/// them; leaf kinds fail cheaply and in isolation.
pub fn max_attempts(kind: TaskKind) -> i64 {
    match kind {
        TaskKind::InitWorldCreation
        | TaskKind::GenerateWorldDescription
        | TaskKind::GenerateWorldImage
        | TaskKind::GenerateCharacterBatch => 4,
        TaskKind::GenerateCharacter
        | TaskKind::GenerateCharacterAvatar
        | TaskKind::GeneratePostBatch
        | TaskKind::GeneratePost
        | TaskKind::GeneratePostImage => 2,
    }
}

/// One worker process's scheduler.
pub struct Worker {
    pool: Arc<ResourcePool>,
    worker_id: String,
    workflow_permits: Arc<Semaphore>,
    wake_tx: mpsc::UnboundedSender<()>,
    wake_rx: mpsc::UnboundedReceiver<()>,
}

impl Worker {
    pub fn new(pool: Arc<ResourcePool>) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let workflow_permits = Arc::new(Semaphore::new(
            pool.config.limits.max_workflow_tasks_per_worker,
        ));
        Self {
            pool,
            worker_id: format!("worker-{}", Uuid::new_v4()),
            workflow_permits,
            wake_tx,
            wake_rx,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run until `shutdown` flips to `true`, then drain.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut running: JoinSet<()> = JoinSet::new();
        tracing::info!(worker_id = %self.worker_id, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            while let Some(joined) = running.try_join_next() {
                if let Err(err) = joined {
                    tracing::error!(error = %err, "workflow task panicked");
                }
            }

            let free = self.workflow_permits.available_permits();
            if free > 0 {
                match self.pool.storage.find_claimable(free).await {
                    Ok(candidates) => {
                        for task in candidates {
                            let Ok(permit) =
                                Arc::clone(&self.workflow_permits).try_acquire_owned()
                            else {
                                break;
                            };
                            match self
                                .pool
                                .storage
                                .claim_task(&task.id, &self.worker_id)
                                .await
                            {
                                Ok(true) => {
                                    let mut task = task;
                                    // Mirror what the claim wrote server-side.
                                    task.status = TaskStatus::InProgress;
                                    task.worker_id = Some(self.worker_id.clone());
                                    task.attempt_count += 1;

                                    let pool = Arc::clone(&self.pool);
                                    let worker_id = self.worker_id.clone();
                                    let wake = self.wake_tx.clone();
                                    running.spawn(async move {
                                        let _permit = permit;
                                        execute_task(pool, worker_id, wake, task).await;
                                    });
                                }
                                Ok(false) => {
                                    // Another worker won the race.
                                }
                                Err(err) => {
                                    tracing::warn!(task_id = %task.id, error = %err, "claim failed");
                                }
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "task poll failed");
                    }
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = self.wake_rx.recv() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }

        tracing::info!(
            worker_id = %self.worker_id,
            in_flight = running.len(),
            "worker draining",
        );
        while let Some(joined) = running.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "workflow task panicked during drain");
            }
        }
        tracing::info!(worker_id = %self.worker_id, "worker drained");
    }
}

/// Drive one claimed task to a terminal (or re-pending) state.
async fn execute_task(
    pool: Arc<ResourcePool>,
    worker_id: String,
    wake: mpsc::UnboundedSender<()>,
    task: Task,
) {
    let task_id = task.id.clone();
    let world_id = task.world_id.clone();
    let kind = task.kind;
    let attempt = task.attempt_count;
    tracing::info!(
        task_id = %task_id,
        kind = %kind,
        world_id = %world_id,
        attempt,
        "executing workflow task",
    );

    let ctx = WorkflowCtx::new(Arc::clone(&pool), task, worker_id, Some(wake));
    match dispatch(&ctx).await {
        Ok(result) => {
            if let Err(err) = pool
                .storage
                .update_task_status(&task_id, TaskStatus::Completed, Some(result), None)
                .await
            {
                tracing::error!(task_id = %task_id, error = %err, "failed to record task completion");
            }
            if let Err(err) = pool
                .storage
                .increment_counter(&world_id, "tasks_completed", 1)
                .await
            {
                tracing::warn!(world_id = %world_id, error = %err, "tasks_completed not counted");
            }
            tracing::info!(task_id = %task_id, kind = %kind, "workflow task completed");
        }
        Err(err) => {
            let class = err.class();
            let retryable = class != ErrorClass::NonRetryable;
            if retryable && attempt < max_attempts(kind) {
                tracing::warn!(
                    task_id = %task_id,
                    kind = %kind,
                    attempt,
                    max_attempts = max_attempts(kind),
                    error = %err,
                    "workflow task failed, rescheduling",
                );
                if let Err(release_err) =
                    pool.storage.release_task(&task_id, &err.to_string()).await
                {
                    tracing::error!(task_id = %task_id, error = %release_err, "failed to release task");
                }
            } else {
                tracing::error!(
                    task_id = %task_id,
                    kind = %kind,
                    attempt,
                    class = ?class,
                    error = %err,
                    "workflow task failed permanently",
                );
                if let Err(status_err) = pool
                    .storage
                    .update_task_status(
                        &task_id,
                        TaskStatus::Failed,
                        None,
                        Some(err.to_string()),
                    )
                    .await
                {
                    tracing::error!(task_id = %task_id, error = %status_err, "failed to record task failure");
                }
                if let Err(count_err) = pool
                    .storage
                    .increment_counter(&world_id, "tasks_failed", 1)
                    .await
                {
                    tracing::warn!(world_id = %world_id, error = %count_err, "tasks_failed not counted");
                }
                mark_failed_stage(&pool, kind, &world_id).await;
            }
        }
    }
}

/// Root-level failures take their stage down with them; branch failures
/// stay isolated so the rest of the world can still complete.
async fn mark_failed_stage(pool: &ResourcePool, kind: TaskKind, world_id: &str) {
    let stage = match kind {
        TaskKind::InitWorldCreation => Some(Stage::Initializing),
        TaskKind::GenerateWorldDescription => Some(Stage::WorldDescription),
        // The world-image workflow records its own stage failure; character
        // and post kinds never fail a stage.
        _ => None,
    };
    if let Some(stage) = stage {
        if let Err(err) = pool
            .storage
            .update_stage(world_id, stage, GenerationState::Failed)
            .await
        {
            tracing::error!(world_id, stage = %stage, error = %err, "failed to mark stage failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_kinds_get_more_attempts() {
        assert_eq!(max_attempts(TaskKind::InitWorldCreation), 4);
        assert_eq!(max_attempts(TaskKind::GenerateWorldDescription), 4);
        assert_eq!(max_attempts(TaskKind::GenerateCharacterBatch), 4);
        assert_eq!(max_attempts(TaskKind::GenerateCharacter), 2);
        assert_eq!(max_attempts(TaskKind::GeneratePostImage), 2);
    }
}
