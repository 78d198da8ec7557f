//! Generate a post's image, create the post record, and close out the
//! world when the post budget is met.

use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use worldforge_proto::media::MediaType;

use super::activity::ActivityOptions;
use super::{WorkflowCtx, WorkflowError};
use crate::error::LlmError;
use crate::prompts;
use crate::schemas::{
    CharacterDetailResponse, PostDetailResponse, PostImagePromptResponse, ResponseSchema,
};
use crate::storage::models::{GenerationState, Stage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratePostImageInput {
    pub world_id: String,
    pub character_id: String,
    pub post_detail: PostDetailResponse,
    pub character_detail: CharacterDetailResponse,
    #[serde(default)]
    pub post_index: i64,
}

pub async fn run(ctx: &WorkflowCtx) -> Result<Document, WorkflowError> {
    let input: GeneratePostImageInput = ctx.input()?;
    let detail = &input.character_detail;
    let post = &input.post_detail;

    let Some(image_prompt) = post
        .image_prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
    else {
        tracing::warn!(
            character_id = %input.character_id,
            "post has no image prompt, skipping",
        );
        return Ok(doc! {"message": "No image prompt provided"});
    };

    let world = ctx.get_world_parameters().await?;
    let prompt = prompts::render(
        prompts::POST_IMAGE,
        &[
            ("world_description", world.format_description().as_str()),
            ("character_name", &detail.display_name),
            ("appearance", &detail.appearance),
            ("avatar_description", &detail.avatar_description),
            ("avatar_style", &detail.avatar_style),
            ("image_prompt", image_prompt),
            ("image_style", post.image_style.as_deref().unwrap_or("")),
            ("post_content", &post.content),
            (
                "structure_description",
                ResponseSchema::PostImagePrompt.structure_template(),
            ),
        ],
    );

    ctx.increment_counter("api_calls_made_LLM", 1).await?;
    let value = ctx
        .generate_structured(
            &prompt,
            ResponseSchema::PostImagePrompt,
            0.7,
            2048,
            ActivityOptions::llm("generate_structured_content", 180, 3, 2, 60),
        )
        .await?;
    let response: PostImagePromptResponse = serde_json::from_value(value).map_err(|e| {
        WorkflowError::Llm(LlmError::Validation {
            schema: ResponseSchema::PostImagePrompt.name().to_string(),
            message: e.to_string(),
        })
    })?;
    let optimized_prompt = if response.prompt.trim().is_empty() {
        image_prompt.to_string()
    } else {
        response.prompt
    };

    ctx.increment_counter("api_calls_made_images", 1).await?;
    let image = ctx
        .generate_image(
            &optimized_prompt,
            MediaType::PostImage,
            Some(&input.character_id),
            512,
            512,
            true,
        )
        .await?;

    let (post_id, created_at) = ctx
        .create_ai_post(
            &input.character_id,
            &post.content,
            &image.media_id,
            &post.hashtags,
        )
        .await?;
    ctx.increment_counter("posts_created", 1).await?;
    tracing::info!(
        post_id = %post_id,
        character_id = %input.character_id,
        media_id = %image.media_id,
        "post created with image",
    );

    finish_world_if_done(ctx).await?;

    Ok(doc! {
        "post_id": post_id,
        "created_at": created_at,
        "character_id": input.character_id,
        "character_name": &detail.display_name,
        "username": &detail.username,
        "media_id": image.media_id,
        "image_url": image.image_url,
        "optimized_prompt": optimized_prompt,
        "content": &post.content,
        "hashtags": &post.hashtags,
    })
}

/// Complete POSTS and FINISHING once the world's post budget is met, or
/// once every other stage has already finished.
///
/// Posts are created by detached workflows with no common parent, so the
/// last one to bump `posts_created` performs the close-out. The check runs
/// after the increment, so at least one workflow observes the final count.
async fn finish_world_if_done(ctx: &WorkflowCtx) -> Result<(), WorkflowError> {
    let Some(status) = ctx.world_status().await? else {
        return Ok(());
    };

    let others_completed = status
        .stages
        .iter()
        .filter(|entry| entry.name != Stage::Posts)
        .all(|entry| entry.status == GenerationState::Completed);
    let budget_met =
        status.posts_predicted > 0 && status.posts_created >= status.posts_predicted;

    if status.posts_created > status.posts_predicted {
        tracing::warn!(
            world_id = ctx.world_id(),
            posts_created = status.posts_created,
            posts_predicted = status.posts_predicted,
            "post count overran the prediction",
        );
    }

    if others_completed || budget_met {
        ctx.update_progress(doc! {"current_stage": Stage::Finishing.as_str()})
            .await?;
        ctx.update_stage(Stage::Posts, GenerationState::Completed)
            .await?;
        ctx.update_stage(Stage::Finishing, GenerationState::Completed)
            .await?;
        tracing::info!(
            world_id = ctx.world_id(),
            posts_created = status.posts_created,
            posts_predicted = status.posts_predicted,
            "world generation finished",
        );
    }
    Ok(())
}
