//! Task store: durable workflow inputs with claim semantics.
//!
//! Workflows never pass large payloads to each other; the payload is written
//! here and only the task id crosses the workflow boundary. Claiming is a
//! single atomic filtered update, so two workers racing for the same task
//! cannot both win.

use mongodb::bson::{doc, DateTime, Document};

use super::models::{Task, TaskStatus};
use super::{Storage, TASKS};
use crate::error::StorageError;

impl Storage {
    /// Insert a new task; fails on a duplicate id.
    pub async fn create_task(&self, task: &Task) -> Result<(), StorageError> {
        let _permit = self.permit().await;
        self.tasks_collection()
            .insert_one(task)
            .await
            .map_err(|e| StorageError::from_insert(e, TASKS, task.id.clone()))?;
        tracing::debug!(task_id = %task.id, kind = %task.kind, "created task");
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StorageError> {
        let _permit = self.permit().await;
        Ok(self
            .tasks_collection()
            .find_one(doc! {"_id": task_id})
            .await?)
    }

    /// `$set` patch with an automatic `updated_at`.
    pub async fn update_task(&self, task_id: &str, mut patch: Document) -> Result<(), StorageError> {
        let _permit = self.permit().await;
        patch.insert("updated_at", DateTime::now());
        let result = self
            .tasks_collection()
            .update_one(doc! {"_id": task_id}, doc! {"$set": patch})
            .await?;
        if result.matched_count == 0 {
            return Err(StorageError::NotFound {
                collection: TASKS,
                id: task_id.to_string(),
            });
        }
        Ok(())
    }

    /// Record the terminal (or re-pending) status, with optional result/error.
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<Document>,
        error: Option<String>,
    ) -> Result<(), StorageError> {
        let mut patch = doc! {"status": status.as_str()};
        if let Some(result) = result {
            patch.insert("result", result);
        }
        if let Some(error) = error {
            patch.insert("error", error);
        }
        self.update_task(task_id, patch).await
    }

    /// Atomic test-and-set claim.
    ///
    /// Succeeds only if the task is still `pending` and unowned; the winning
    /// worker's id is recorded and `attempt_count` is incremented exactly
    /// once. Returns `false` when another worker got there first.
    pub async fn claim_task(&self, task_id: &str, worker_id: &str) -> Result<bool, StorageError> {
        let _permit = self.permit().await;
        let result = self
            .tasks_collection()
            .update_one(
                doc! {
                    "_id": task_id,
                    "status": TaskStatus::Pending.as_str(),
                    "worker_id": null,
                },
                doc! {
                    "$set": {
                        "status": TaskStatus::InProgress.as_str(),
                        "worker_id": worker_id,
                        "updated_at": DateTime::now(),
                    },
                    "$inc": {"attempt_count": 1},
                },
            )
            .await?;

        let claimed = result.matched_count > 0;
        if claimed {
            tracing::debug!(task_id, worker_id, "task claimed");
        } else {
            tracing::debug!(task_id, worker_id, "claim lost or task not claimable");
        }
        Ok(claimed)
    }

    /// Put a failed-but-retryable task back in the queue for any worker.
    pub async fn release_task(&self, task_id: &str, error: &str) -> Result<(), StorageError> {
        let _permit = self.permit().await;
        let result = self
            .tasks_collection()
            .update_one(
                doc! {"_id": task_id},
                doc! {"$set": {
                    "status": TaskStatus::Pending.as_str(),
                    "worker_id": null,
                    "error": error,
                    "updated_at": DateTime::now(),
                }},
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StorageError::NotFound {
                collection: TASKS,
                id: task_id.to_string(),
            });
        }
        Ok(())
    }

    /// Oldest unclaimed tasks, for the worker poll loop.
    pub async fn find_claimable(&self, limit: usize) -> Result<Vec<Task>, StorageError> {
        use futures_util::TryStreamExt;

        let _permit = self.permit().await;
        let cursor = self
            .tasks_collection()
            .find(doc! {"status": TaskStatus::Pending.as_str(), "worker_id": null})
            .sort(doc! {"created_at": 1})
            .limit(limit as i64)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    /// All tasks belonging to one world, oldest first.
    pub async fn find_tasks_by_world(&self, world_id: &str) -> Result<Vec<Task>, StorageError> {
        use futures_util::TryStreamExt;

        let _permit = self.permit().await;
        let cursor = self
            .tasks_collection()
            .find(doc! {"world_id": world_id})
            .sort(doc! {"created_at": 1})
            .await?;
        Ok(cursor.try_collect().await?)
    }
}
