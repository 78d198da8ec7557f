//! Write one post and hand its image (and record creation) to the
//! post-image workflow.
//!
//! Post records are created by `GeneratePostImage`, not here: the post and
//! its image land in the Post service together or not at all.

use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use super::activity::ActivityOptions;
use super::post_image::GeneratePostImageInput;
use super::{WorkflowCtx, WorkflowError};
use crate::error::LlmError;
use crate::prompts;
use crate::schemas::{
    CharacterDetailResponse, PostConcept, PostDetailResponse, ResponseSchema,
};
use crate::storage::models::TaskKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratePostInput {
    pub world_id: String,
    pub character_id: String,
    pub post: PostConcept,
    pub character_detail: CharacterDetailResponse,
    #[serde(default)]
    pub post_index: i64,
}

pub async fn run(ctx: &WorkflowCtx) -> Result<Document, WorkflowError> {
    let input: GeneratePostInput = ctx.input()?;
    let detail = &input.character_detail;
    tracing::info!(
        character_id = %input.character_id,
        topic = %input.post.topic,
        "starting post generation",
    );

    let world = ctx.get_world_parameters().await?;
    let prompt = build_prompt(&input, &world.format_description());

    ctx.increment_counter("api_calls_made_LLM", 1).await?;
    let value = ctx
        .generate_structured(
            &prompt,
            ResponseSchema::PostDetail,
            0.8,
            4096,
            ActivityOptions::llm("generate_structured_content", 300, 3, 2, 120),
        )
        .await?;
    let post_detail: PostDetailResponse = serde_json::from_value(value).map_err(|e| {
        WorkflowError::Llm(LlmError::Validation {
            schema: ResponseSchema::PostDetail.name().to_string(),
            message: e.to_string(),
        })
    })?;

    let image_input = GeneratePostImageInput {
        world_id: input.world_id.clone(),
        character_id: input.character_id.clone(),
        post_detail: post_detail.clone(),
        character_detail: detail.clone(),
        post_index: input.post_index,
    };
    let image_task = ctx
        .spawn_detached(TaskKind::GeneratePostImage, &image_input)
        .await?;

    Ok(doc! {
        "character_id": input.character_id,
        "character_name": &detail.display_name,
        "username": &detail.username,
        "content": post_detail.content,
        "hashtags": post_detail.hashtags,
        "mood": post_detail.mood,
        "context": post_detail.context,
        "image_task_id": image_task.task_id,
    })
}

fn build_prompt(input: &GeneratePostInput, world_description: &str) -> String {
    let detail = &input.character_detail;
    prompts::render(
        prompts::POST_DETAIL,
        &[
            ("world_description", world_description),
            ("character_name", &detail.display_name),
            ("character_description", &detail.personality),
            ("speaking_style", &detail.speaking_style),
            ("appearance", &detail.appearance),
            ("secret", &detail.secret),
            ("daily_routine", &detail.daily_routine),
            ("avatar_description", &detail.avatar_description),
            ("avatar_style", &detail.avatar_style),
            ("post_topic", &input.post.topic),
            ("post_brief", &input.post.content_brief),
            ("emotional_tone", &input.post.emotional_tone),
            ("post_type", &input.post.post_type),
            ("relevance_to_character", &input.post.relevance_to_character),
            (
                "structure_description",
                ResponseSchema::PostDetail.structure_template(),
            ),
        ],
    )
}
