//! Expand one character seed into a full profile and fan out its avatar
//! and post batch.

use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use super::activity::ActivityOptions;
use super::character_avatar::GenerateCharacterAvatarInput;
use super::post_batch::GeneratePostBatchInput;
use super::{WorkflowCtx, WorkflowError};
use crate::error::LlmError;
use crate::prompts;
use crate::schemas::{CharacterDetailResponse, CharacterSeed, ResponseSchema};
use crate::storage::models::TaskKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateCharacterInput {
    pub world_id: String,
    pub character: CharacterSeed,
    pub posts_per_character: i64,
}

pub async fn run(ctx: &WorkflowCtx) -> Result<Document, WorkflowError> {
    let input: GenerateCharacterInput = ctx.input()?;
    tracing::info!(
        world_id = %input.world_id,
        concept = %input.character.concept_short,
        "starting character generation",
    );

    let world = ctx.get_world_parameters().await?;
    let prompt = prompts::render(
        prompts::CHARACTER_DETAIL,
        &[
            ("world_description", world.format_description().as_str()),
            ("character_concept", &input.character.concept),
            ("role_in_world", &input.character.role_in_world),
            (
                "personality_traits",
                &input.character.personality_traits.join(", "),
            ),
            ("interests", &input.character.interests.join(", ")),
            (
                "structure_description",
                ResponseSchema::CharacterDetail.structure_template(),
            ),
        ],
    );

    ctx.increment_counter("api_calls_made_LLM", 1).await?;
    let value = ctx
        .generate_structured(
            &prompt,
            ResponseSchema::CharacterDetail,
            0.8,
            4096,
            ActivityOptions::llm("generate_structured_content", 300, 3, 2, 120),
        )
        .await?;
    let detail: CharacterDetailResponse = serde_json::from_value(value).map_err(|e| {
        WorkflowError::Llm(LlmError::Validation {
            schema: ResponseSchema::CharacterDetail.name().to_string(),
            message: e.to_string(),
        })
    })?;

    let meta_json = serde_json::to_string(&detail).map_err(|e| {
        WorkflowError::InvalidInput(format!("character profile not serializable: {e}"))
    })?;
    let character_id = ctx.create_character(&detail.display_name, &meta_json).await?;
    ctx.increment_counter("users_created", 1).await?;
    tracing::info!(character_id = %character_id, username = %detail.username, "character created");

    let avatar_input = GenerateCharacterAvatarInput {
        world_id: input.world_id.clone(),
        character_id: character_id.clone(),
        character_detail: detail.clone(),
    };
    let avatar = ctx
        .spawn_detached(TaskKind::GenerateCharacterAvatar, &avatar_input)
        .await?;

    let posts_input = GeneratePostBatchInput {
        world_id: input.world_id.clone(),
        character_id: character_id.clone(),
        posts_count: input.posts_per_character,
        character_detail: detail.clone(),
        generated_posts_count: 0,
        generated_posts_description: String::new(),
        count_run: 0,
        recursion_depth: 0,
        total_posts_count: None,
    };
    let posts = ctx
        .spawn_detached(TaskKind::GeneratePostBatch, &posts_input)
        .await?;

    Ok(doc! {
        "character_id": character_id,
        "username": detail.username,
        "display_name": detail.display_name,
        "avatar_task_id": avatar.task_id,
        "posts_task_id": posts.task_id,
    })
}
