//! Generate a character's avatar and attach it to the profile.

use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use worldforge_proto::media::MediaType;

use super::activity::ActivityOptions;
use super::{WorkflowCtx, WorkflowError};
use crate::error::LlmError;
use crate::prompts;
use crate::schemas::{CharacterAvatarPromptResponse, CharacterDetailResponse, ResponseSchema};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateCharacterAvatarInput {
    pub world_id: String,
    pub character_id: String,
    pub character_detail: CharacterDetailResponse,
}

pub async fn run(ctx: &WorkflowCtx) -> Result<Document, WorkflowError> {
    let input: GenerateCharacterAvatarInput = ctx.input()?;
    let detail = &input.character_detail;

    if detail.avatar_description.trim().is_empty() {
        tracing::warn!(
            character_id = %input.character_id,
            "no avatar description, skipping avatar generation",
        );
        return Ok(doc! {"message": "No avatar description provided"});
    }

    let world = ctx.get_world_parameters().await?;
    let prompt = prompts::render(
        prompts::CHARACTER_AVATAR,
        &[
            ("world_description", world.format_description().as_str()),
            ("character_name", &detail.display_name),
            ("appearance_description", &detail.appearance),
            ("avatar_description", &detail.avatar_description),
            ("avatar_style", &detail.avatar_style),
            (
                "structure_description",
                ResponseSchema::CharacterAvatarPrompt.structure_template(),
            ),
        ],
    );

    ctx.increment_counter("api_calls_made_LLM", 1).await?;
    let value = ctx
        .generate_structured(
            &prompt,
            ResponseSchema::CharacterAvatarPrompt,
            0.7,
            2048,
            ActivityOptions::llm("generate_structured_content", 180, 3, 2, 60),
        )
        .await?;
    let response: CharacterAvatarPromptResponse = serde_json::from_value(value).map_err(|e| {
        WorkflowError::Llm(LlmError::Validation {
            schema: ResponseSchema::CharacterAvatarPrompt.name().to_string(),
            message: e.to_string(),
        })
    })?;
    let avatar_prompt = if response.prompt.trim().is_empty() {
        detail.avatar_description.clone()
    } else {
        response.prompt
    };

    ctx.increment_counter("api_calls_made_images", 1).await?;
    let avatar = ctx
        .generate_image(
            &avatar_prompt,
            MediaType::CharacterAvatar,
            Some(&input.character_id),
            512,
            512,
            true,
        )
        .await?;

    ctx.update_character_avatar(&input.character_id, &avatar.media_id)
        .await?;

    tracing::info!(
        character_id = %input.character_id,
        avatar_id = %avatar.media_id,
        "avatar generated",
    );
    Ok(doc! {
        "character_id": input.character_id,
        "username": detail.username.clone(),
        "display_name": detail.display_name.clone(),
        "avatar_id": avatar.media_id,
        "avatar_url": avatar.image_url,
        "avatar_prompt": avatar_prompt,
    })
}
