//! Root workflow: initialize a world generation and hand off to the
//! description step.

use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use super::world_description::GenerateWorldDescriptionInput;
use super::{WorkflowCtx, WorkflowError};
use crate::config::{DEFAULT_IMAGE_CALL_LIMIT, DEFAULT_LLM_CALL_LIMIT};
use crate::storage::models::{GenerationState, Stage, TaskKind};

/// Input published by the entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitWorldCreationInput {
    pub world_id: String,
    #[serde(default)]
    pub world_name: String,
    pub world_prompt: String,
    pub characters_count: i64,
    pub posts_count: i64,
    #[serde(default)]
    pub api_call_limits_llm: Option<i64>,
    #[serde(default)]
    pub api_call_limits_images: Option<i64>,
}

pub async fn run(ctx: &WorkflowCtx) -> Result<Document, WorkflowError> {
    let input: InitWorldCreationInput = ctx.input()?;
    tracing::info!(world_id = %input.world_id, "initializing world creation");

    if input.world_prompt.trim().is_empty() {
        return Err(WorkflowError::InvalidInput(
            "world prompt is required".to_string(),
        ));
    }

    let llm_limit = input
        .api_call_limits_llm
        .unwrap_or(DEFAULT_LLM_CALL_LIMIT);
    let images_limit = input
        .api_call_limits_images
        .unwrap_or(DEFAULT_IMAGE_CALL_LIMIT);

    ctx.initialize_world(
        input.characters_count,
        input.posts_count,
        &input.world_prompt,
        llm_limit,
        images_limit,
    )
    .await?;
    ctx.update_stage(Stage::Initializing, GenerationState::Completed)
        .await?;

    let description_input = GenerateWorldDescriptionInput {
        world_id: input.world_id.clone(),
        user_prompt: input.world_prompt.clone(),
        users_count: input.characters_count,
        posts_count: input.posts_count,
    };
    let child = ctx
        .spawn_detached(TaskKind::GenerateWorldDescription, &description_input)
        .await?;
    ctx.update_stage(Stage::WorldDescription, GenerationState::InProgress)
        .await?;

    tracing::info!(world_id = %input.world_id, "world creation initialized");
    Ok(doc! {
        "message": "World generation initialized successfully",
        "world_id": input.world_id,
        "description_task_id": child.task_id,
        "users_count": input.characters_count,
        "posts_count": input.posts_count,
    })
}
