//! Generate the world description and fan out to images and characters.

use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use super::activity::ActivityOptions;
use super::character_batch::GenerateCharacterBatchInput;
use super::world_image::GenerateWorldImageInput;
use super::{WorkflowCtx, WorkflowError};
use crate::error::LlmError;
use crate::prompts;
use crate::schemas::{ResponseSchema, WorldDescriptionResponse};
use crate::storage::models::{GenerationState, Stage, TaskKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateWorldDescriptionInput {
    pub world_id: String,
    pub user_prompt: String,
    #[serde(default = "default_users_count")]
    pub users_count: i64,
    #[serde(default = "default_posts_count")]
    pub posts_count: i64,
}

fn default_users_count() -> i64 {
    i64::from(crate::config::DEFAULT_USERS_COUNT)
}

fn default_posts_count() -> i64 {
    i64::from(crate::config::DEFAULT_POSTS_COUNT)
}

pub async fn run(ctx: &WorkflowCtx) -> Result<Document, WorkflowError> {
    let input: GenerateWorldDescriptionInput = ctx.input()?;
    tracing::info!(world_id = %input.world_id, "starting world description generation");

    ctx.update_stage(Stage::WorldDescription, GenerationState::InProgress)
        .await?;

    let prompt = prompts::render(
        prompts::WORLD_DESCRIPTION,
        &[
            ("user_prompt", &input.user_prompt),
            (
                "structure_description",
                ResponseSchema::WorldDescription.structure_template(),
            ),
        ],
    );

    ctx.increment_counter("api_calls_made_LLM", 1).await?;
    let value = ctx
        .generate_structured(
            &prompt,
            ResponseSchema::WorldDescription,
            0.8,
            4096,
            ActivityOptions::llm("generate_structured_content", 300, 5, 2, 120),
        )
        .await?;
    let world: WorldDescriptionResponse = serde_json::from_value(value).map_err(|e| {
        WorkflowError::Llm(LlmError::Validation {
            schema: ResponseSchema::WorldDescription.name().to_string(),
            message: e.to_string(),
        })
    })?;

    ctx.persist_world_parameters(&world).await?;
    ctx.update_stage(Stage::WorldDescription, GenerationState::Completed)
        .await?;

    start_next_workflows(ctx, &input).await?;

    tracing::info!(world_id = %input.world_id, world_name = %world.name, "world description completed");
    Ok(doc! {
        "world_name": world.name,
        "world_description": world.description,
        "world_theme": world.theme,
    })
}

/// Spawn the image and character branches; they advance independently.
async fn start_next_workflows(
    ctx: &WorkflowCtx,
    input: &GenerateWorldDescriptionInput,
) -> Result<(), WorkflowError> {
    let image_input = GenerateWorldImageInput {
        world_id: input.world_id.clone(),
    };
    ctx.spawn_detached(TaskKind::GenerateWorldImage, &image_input)
        .await?;

    let batch_input = GenerateCharacterBatchInput {
        world_id: input.world_id.clone(),
        users_count: input.users_count,
        posts_count: input.posts_count,
        remaining_posts_count: None,
        total_users_count: None,
        generated_characters_description: String::new(),
        generated_count: 0,
        count_run: 0,
        recursion_depth: 0,
    };
    ctx.spawn_detached(TaskKind::GenerateCharacterBatch, &batch_input)
        .await?;

    ctx.update_stage(Stage::WorldImage, GenerationState::InProgress)
        .await?;
    ctx.update_stage(Stage::Characters, GenerationState::InProgress)
        .await?;
    Ok(())
}
