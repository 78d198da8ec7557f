//! Workflow context: every effect a workflow is allowed to have.
//!
//! Each method is one activity: it routes through [`run_activity`] with the
//! queue, timeout and retry policy of its class, and touches the shared
//! clients owned by the resource pool. Workflow modules never see the pool
//! directly, which keeps them deterministic and the effect surface audited.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use worldforge_proto::media::MediaType;

use super::activity::{run_activity, ActivityOptions};
use super::{TaskRef, WorkflowError};
use crate::error::StorageError;
use crate::image::{GeneratedImage, ImageRequest};
use crate::llm::LlmCall;
use crate::resources::ResourcePool;
use crate::schemas::{ResponseSchema, WorldDescriptionResponse};
use crate::storage::models::{GenerationState, Stage, Task, TaskKind, WorldGenerationStatus};
use crate::storage::progress::CostKind;

/// Handle used by a running workflow to reach the outside world.
pub struct WorkflowCtx {
    pub pool: Arc<ResourcePool>,
    /// The claimed task document driving this workflow.
    pub task: Task,
    pub worker_id: String,
    wake: Option<mpsc::UnboundedSender<()>>,
}

impl WorkflowCtx {
    pub fn new(
        pool: Arc<ResourcePool>,
        task: Task,
        worker_id: String,
        wake: Option<mpsc::UnboundedSender<()>>,
    ) -> Self {
        Self {
            pool,
            task,
            worker_id,
            wake,
        }
    }

    pub fn world_id(&self) -> &str {
        &self.task.world_id
    }

    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    /// Deserialize this task's stored input payload.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, WorkflowError> {
        mongodb::bson::from_document(self.task.parameters.clone())
            .map_err(|e| WorkflowError::Storage(StorageError::Deserialize(e)))
    }

    // --- Detached children ---

    /// Schedule a detached child workflow.
    ///
    /// The child's full input is written as a pending task document; any
    /// worker bound to the queue may claim it, and it survives this parent
    /// finishing or dying. `tasks_total` counts it immediately.
    pub async fn spawn_detached<T: Serialize>(
        &self,
        kind: TaskKind,
        input: &T,
    ) -> Result<TaskRef, WorkflowError> {
        let parameters =
            mongodb::bson::to_document(input).map_err(StorageError::Serialize)?;
        let child = Task::new(
            Uuid::new_v4().to_string(),
            kind,
            self.world_id().to_string(),
            parameters,
        );

        let storage = &self.pool.storage;
        let child_ref = &child;
        run_activity(&self.pool, ActivityOptions::progress("create_task"), || {
            async move {
                storage.create_task(child_ref).await?;
                Ok(())
            }
        })
        .await?;
        self.increment_counter("tasks_total", 1).await?;

        if let Some(wake) = &self.wake {
            let _ = wake.send(());
        }
        tracing::info!(
            parent_task = %self.task.id,
            child_task = %child.id,
            kind = %kind,
            "scheduled detached child workflow",
        );
        Ok(TaskRef { task_id: child.id })
    }

    // --- Progress ledger ---

    pub async fn initialize_world(
        &self,
        users_predicted: i64,
        posts_predicted: i64,
        user_prompt: &str,
        llm_limit: i64,
        images_limit: i64,
    ) -> Result<(), WorkflowError> {
        let storage = &self.pool.storage;
        let world_id = self.world_id();
        run_activity(
            &self.pool,
            ActivityOptions::progress("initialize_world_generation"),
            || async move {
                storage
                    .initialize_world(
                        world_id,
                        users_predicted,
                        posts_predicted,
                        user_prompt,
                        llm_limit,
                        images_limit,
                    )
                    .await?;
                Ok(())
            },
        )
        .await
    }

    pub async fn update_stage(
        &self,
        stage: Stage,
        status: GenerationState,
    ) -> Result<(), WorkflowError> {
        let storage = &self.pool.storage;
        let world_id = self.world_id();
        run_activity(&self.pool, ActivityOptions::progress("update_stage"), || {
            async move {
                storage.update_stage(world_id, stage, status).await?;
                Ok(())
            }
        })
        .await
    }

    pub async fn increment_counter(&self, field: &str, delta: i64) -> Result<(), WorkflowError> {
        let storage = &self.pool.storage;
        let world_id = self.world_id();
        run_activity(
            &self.pool,
            ActivityOptions::progress("increment_counter"),
            || async move {
                storage.increment_counter(world_id, field, delta).await?;
                Ok(())
            },
        )
        .await
    }

    /// Generic multi-field `$set` on the ledger.
    pub async fn update_progress(
        &self,
        updates: mongodb::bson::Document,
    ) -> Result<(), WorkflowError> {
        let storage = &self.pool.storage;
        let world_id = self.world_id();
        let updates_ref = &updates;
        run_activity(
            &self.pool,
            ActivityOptions::progress("update_progress"),
            || async move {
                storage.update_progress(world_id, updates_ref.clone()).await?;
                Ok(())
            },
        )
        .await
    }

    pub async fn world_status(&self) -> Result<Option<WorldGenerationStatus>, WorkflowError> {
        let storage = &self.pool.storage;
        let world_id = self.world_id();
        run_activity(
            &self.pool,
            ActivityOptions::progress("get_world_status"),
            || async move { Ok(storage.get_world_status(world_id).await?) },
        )
        .await
    }

    // --- World parameters ---

    /// Load the stored world parameters; a missing document is a broken
    /// precondition for every downstream workflow.
    pub async fn get_world_parameters(&self) -> Result<WorldDescriptionResponse, WorkflowError> {
        let storage = &self.pool.storage;
        let world_id = self.world_id();
        let params = run_activity(
            &self.pool,
            ActivityOptions::main("get_world_parameters"),
            || async move { Ok(storage.get_world_parameters(world_id).await?) },
        )
        .await?;
        params
            .map(|p| p.world)
            .ok_or_else(|| WorkflowError::MissingWorldParameters {
                world_id: world_id.to_string(),
            })
    }

    /// Persist the generated world: once in the document store, once in the
    /// World service.
    pub async fn persist_world_parameters(
        &self,
        world: &WorldDescriptionResponse,
    ) -> Result<(), WorkflowError> {
        let storage = &self.pool.storage;
        let world_id = self.world_id();
        run_activity(
            &self.pool,
            ActivityOptions::main("save_world_parameters"),
            || async move {
                storage.save_world_parameters(world_id, world).await?;
                Ok(())
            },
        )
        .await?;

        let params_json = serde_json::to_string(world).map_err(|e| {
            WorkflowError::InvalidInput(format!("world parameters not serializable: {e}"))
        })?;
        let services = &self.pool.services;
        let task_id = self.task_id();
        let params_ref = params_json.as_str();
        run_activity(
            &self.pool,
            ActivityOptions::services("update_world_params"),
            || async move {
                services
                    .update_world_params(world_id, params_ref, task_id)
                    .await?;
                Ok(())
            },
        )
        .await
    }

    // --- LLM ---

    /// Structured completion against a registered schema, with LLM spend
    /// recorded on the ledger.
    pub async fn generate_structured(
        &self,
        prompt: &str,
        schema: ResponseSchema,
        temperature: f32,
        max_output_tokens: u32,
        options: ActivityOptions,
    ) -> Result<Value, WorkflowError> {
        let llm = &self.pool.llm;
        let call = LlmCall {
            prompt,
            model: None,
            temperature,
            max_output_tokens,
            task_id: self.task_id(),
            world_id: self.world_id(),
        };
        let schema_name = schema.name();
        let output = run_activity(&self.pool, options, || async move {
            Ok(llm.generate_structured(call, schema_name).await?)
        })
        .await?;

        if output.cost > 0.0 {
            if let Err(err) = self
                .pool
                .storage
                .increment_cost(self.world_id(), CostKind::Llm, output.cost)
                .await
            {
                tracing::warn!(world_id = self.world_id(), error = %err, "LLM cost not recorded");
            }
        }
        Ok(output.value)
    }

    // --- Images ---

    pub async fn generate_image(
        &self,
        prompt: &str,
        media_type: MediaType,
        character_id: Option<&str>,
        width: u32,
        height: u32,
        enhance: bool,
    ) -> Result<GeneratedImage, WorkflowError> {
        let images = &self.pool.images;
        let request = ImageRequest {
            prompt,
            world_id: self.world_id(),
            media_type,
            character_id,
            width,
            height,
            filename: None,
            enhance,
            model: None,
            task_id: self.task_id(),
        };
        run_activity(&self.pool, ActivityOptions::images("generate_image"), || {
            async move { Ok(images.generate_image(request).await?) }
        })
        .await
    }

    // --- Downstream services ---

    /// Create the character record; returns its id.
    pub async fn create_character(
        &self,
        display_name: &str,
        meta_json: &str,
    ) -> Result<String, WorkflowError> {
        let services = &self.pool.services;
        let world_id = self.world_id();
        let task_id = self.task_id();
        let character = run_activity(
            &self.pool,
            ActivityOptions::services("create_character"),
            || async move {
                Ok(services
                    .create_character(world_id, display_name, Some(meta_json), None, task_id)
                    .await?)
            },
        )
        .await?;
        Ok(character.id)
    }

    pub async fn update_character_avatar(
        &self,
        character_id: &str,
        avatar_media_id: &str,
    ) -> Result<(), WorkflowError> {
        let services = &self.pool.services;
        let task_id = self.task_id();
        run_activity(
            &self.pool,
            ActivityOptions::services("update_character_avatar"),
            || async move {
                services
                    .update_character(character_id, None, Some(avatar_media_id), None, task_id)
                    .await?;
                Ok(())
            },
        )
        .await
    }

    /// Create the post record; returns `(post_id, created_at)`.
    pub async fn create_ai_post(
        &self,
        character_id: &str,
        caption: &str,
        media_id: &str,
        tags: &[String],
    ) -> Result<(String, String), WorkflowError> {
        let services = &self.pool.services;
        let world_id = self.world_id();
        let task_id = self.task_id();
        run_activity(
            &self.pool,
            ActivityOptions::services("create_post"),
            || async move {
                Ok(services
                    .create_ai_post(character_id, caption, media_id, world_id, tags, task_id)
                    .await?)
            },
        )
        .await
    }

    pub async fn update_world_images(
        &self,
        header_media_id: &str,
        icon_media_id: &str,
    ) -> Result<(), WorkflowError> {
        let services = &self.pool.services;
        let world_id = self.world_id();
        let task_id = self.task_id();
        run_activity(
            &self.pool,
            ActivityOptions::services("update_world_image"),
            || async move {
                services
                    .update_world_images(world_id, header_media_id, icon_media_id, task_id)
                    .await?;
                Ok(())
            },
        )
        .await
    }
}
