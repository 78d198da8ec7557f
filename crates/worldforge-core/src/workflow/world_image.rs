//! Generate the world's header and icon images in parallel.

use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use worldforge_proto::media::MediaType;

use super::activity::ActivityOptions;
use super::{WorkflowCtx, WorkflowError};
use crate::error::LlmError;
use crate::prompts;
use crate::schemas::{ImagePromptResponse, ResponseSchema};
use crate::storage::models::{GenerationState, Stage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateWorldImageInput {
    pub world_id: String,
}

pub async fn run(ctx: &WorkflowCtx) -> Result<Document, WorkflowError> {
    match generate(ctx).await {
        Ok(result) => Ok(result),
        Err(err) => {
            // This branch fails alone; the characters branch keeps running.
            if let Err(stage_err) = ctx
                .update_stage(Stage::WorldImage, GenerationState::Failed)
                .await
            {
                tracing::error!(
                    world_id = ctx.world_id(),
                    error = %stage_err,
                    "failed to record world image stage failure",
                );
            }
            Err(err)
        }
    }
}

async fn generate(ctx: &WorkflowCtx) -> Result<Document, WorkflowError> {
    let input: GenerateWorldImageInput = ctx.input()?;
    tracing::info!(world_id = %input.world_id, "starting world image generation");

    let world = ctx.get_world_parameters().await?;
    let world_description = world.format_description();

    let prompt = prompts::render(
        prompts::WORLD_IMAGE,
        &[
            ("world_description", world_description.as_str()),
            (
                "structure_description",
                ResponseSchema::ImagePrompts.structure_template(),
            ),
        ],
    );

    ctx.increment_counter("api_calls_made_LLM", 1).await?;
    let value = ctx
        .generate_structured(
            &prompt,
            ResponseSchema::ImagePrompts,
            0.7,
            2048,
            ActivityOptions::llm("generate_structured_content", 180, 3, 2, 60),
        )
        .await?;
    let image_prompts: ImagePromptResponse = serde_json::from_value(value).map_err(|e| {
        WorkflowError::Llm(LlmError::Validation {
            schema: ResponseSchema::ImagePrompts.name().to_string(),
            message: e.to_string(),
        })
    })?;

    ctx.increment_counter("api_calls_made_images", 2).await?;

    let (header, icon) = tokio::try_join!(
        ctx.generate_image(
            &image_prompts.header_prompt,
            MediaType::WorldHeader,
            None,
            1024,
            512,
            true,
        ),
        ctx.generate_image(
            &image_prompts.icon_prompt,
            MediaType::WorldIcon,
            None,
            512,
            512,
            true,
        ),
    )?;

    ctx.update_world_images(&header.media_id, &icon.media_id)
        .await?;
    ctx.update_stage(Stage::WorldImage, GenerationState::Completed)
        .await?;

    tracing::info!(
        world_id = %input.world_id,
        header_id = %header.media_id,
        icon_id = %icon.media_id,
        "world images completed",
    );
    Ok(doc! {
        "header_prompt": image_prompts.header_prompt,
        "icon_prompt": image_prompts.icon_prompt,
        "header_id": header.media_id,
        "header_url": header.image_url,
        "icon_id": icon.media_id,
        "icon_url": icon.image_url,
        "style_reference": image_prompts.style_reference,
        "mood": image_prompts.mood,
    })
}
