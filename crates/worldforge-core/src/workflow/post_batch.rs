//! Recursive post batch generation for one character.
//!
//! Mirrors the character batch: slices of at most
//! [`batch::MAX_POSTS_PER_BATCH`] concepts per instance, a running summary
//! carried into the next slice, and a depth safety net derived from the
//! character's total post count.

use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use super::activity::ActivityOptions;
use super::batch;
use super::post::GeneratePostInput;
use super::{WorkflowCtx, WorkflowError};
use crate::error::LlmError;
use crate::prompts;
use crate::schemas::{CharacterDetailResponse, PostBatchResponse, PostConcept, ResponseSchema};
use crate::storage::models::TaskKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratePostBatchInput {
    pub world_id: String,
    pub character_id: String,
    /// Total posts this character should end up with.
    pub posts_count: i64,
    pub character_detail: CharacterDetailResponse,
    #[serde(default)]
    pub generated_posts_count: i64,
    #[serde(default)]
    pub generated_posts_description: String,
    #[serde(default)]
    pub count_run: i64,
    #[serde(default)]
    pub recursion_depth: i64,
    /// Invariant across the recursion; defaults to `posts_count`.
    #[serde(default)]
    pub total_posts_count: Option<i64>,
}

pub async fn run(ctx: &WorkflowCtx) -> Result<Document, WorkflowError> {
    let input: GeneratePostBatchInput = ctx.input()?;
    let detail = &input.character_detail;
    let total_posts = input.total_posts_count.unwrap_or(input.posts_count);

    let max_allowed_depth =
        batch::max_allowed_depth(total_posts, batch::MAX_POST_RECURSION_DEPTH);

    tracing::debug!(
        character_id = %input.character_id,
        posts_count = input.posts_count,
        total_posts_count = total_posts,
        generated_posts_count = input.generated_posts_count,
        recursion_depth = input.recursion_depth,
        max_allowed_depth,
        "post batch parameters",
    );

    let diagnostic = |message: &str, generated: i64| {
        doc! {
            "posts_count": 0i64,
            "total_posts_count": generated,
            "remaining_posts": input.posts_count - generated,
            "recursion_depth": input.recursion_depth,
            "max_allowed_depth": max_allowed_depth,
            "character_id": &input.character_id,
            "character_name": &detail.display_name,
            "username": &detail.username,
            "error": message,
        }
    };

    if input.recursion_depth >= max_allowed_depth {
        tracing::warn!(character_id = %input.character_id, "maximum recursion depth reached");
        return Ok(diagnostic(batch::DEPTH_CAP_MESSAGE, input.generated_posts_count));
    }
    if total_posts <= 0 {
        tracing::warn!(character_id = %input.character_id, "character has no post budget");
        return Ok(diagnostic("No posts for character", input.generated_posts_count));
    }

    let current_batch_size =
        (input.posts_count - input.generated_posts_count).min(batch::MAX_POSTS_PER_BATCH);
    if current_batch_size <= 0 {
        return Ok(doc! {
            "posts_count": 0i64,
            "total_posts_count": input.generated_posts_count,
            "character_id": &input.character_id,
            "message": "All posts already generated",
        });
    }

    let world = ctx.get_world_parameters().await?;
    let prompt = build_prompt(&input, &world.format_description(), current_batch_size, total_posts);

    ctx.increment_counter("api_calls_made_LLM", 1).await?;
    let value = ctx
        .generate_structured(
            &prompt,
            ResponseSchema::PostBatch,
            0.9,
            6144,
            ActivityOptions::llm("generate_structured_content", 480, 3, 3, 180),
        )
        .await?;
    let response: PostBatchResponse = serde_json::from_value(value).map_err(|e| {
        WorkflowError::Llm(LlmError::Validation {
            schema: ResponseSchema::PostBatch.name().to_string(),
            message: e.to_string(),
        })
    })?;

    let mut posts = response.posts;
    tracing::info!(
        character_id = %input.character_id,
        generated = posts.len(),
        requested = current_batch_size,
        "LLM generated post batch",
    );

    if posts.is_empty() {
        tracing::warn!(character_id = %input.character_id, "no posts generated");
        return Ok(diagnostic("No posts generated", input.generated_posts_count));
    }
    batch::adjust_post_concepts(&mut posts, current_batch_size as usize);

    let description = accumulate_description(&input.generated_posts_description, &posts);

    for (index, post) in posts.iter().enumerate() {
        let child_input = GeneratePostInput {
            world_id: input.world_id.clone(),
            character_id: input.character_id.clone(),
            post: post.clone(),
            character_detail: detail.clone(),
            post_index: input.generated_posts_count + index as i64,
        };
        ctx.spawn_detached(TaskKind::GeneratePost, &child_input)
            .await?;
    }

    let produced = posts.len() as i64;
    let new_generated_count = input.generated_posts_count + produced;
    let remaining_posts = input.posts_count - new_generated_count;

    if remaining_posts > 0 {
        if input.recursion_depth + 1 < max_allowed_depth {
            let next_input = GeneratePostBatchInput {
                world_id: input.world_id.clone(),
                character_id: input.character_id.clone(),
                posts_count: input.posts_count,
                character_detail: detail.clone(),
                generated_posts_count: new_generated_count,
                generated_posts_description: description.clone(),
                count_run: input.count_run + 1,
                recursion_depth: input.recursion_depth + 1,
                total_posts_count: Some(total_posts),
            };
            ctx.spawn_detached(TaskKind::GeneratePostBatch, &next_input)
                .await?;
            tracing::info!(
                character_id = %input.character_id,
                remaining_posts,
                "scheduled next post batch",
            );
        } else {
            tracing::warn!(
                character_id = %input.character_id,
                remaining_posts,
                "depth cap prevents another batch; remaining posts will not be generated",
            );
        }
    }

    tracing::info!(
        character_id = %input.character_id,
        produced,
        total = new_generated_count,
        "post batch completed",
    );
    Ok(doc! {
        "posts_count": produced,
        "total_posts_count": new_generated_count,
        "remaining_posts": remaining_posts,
        "recursion_depth": input.recursion_depth,
        "character_id": &input.character_id,
        "character_name": &detail.display_name,
        "generated_posts_description": description,
    })
}

fn build_prompt(
    input: &GeneratePostBatchInput,
    world_description: &str,
    current_batch_size: i64,
    total_posts: i64,
) -> String {
    let detail = &input.character_detail;
    let future_posts =
        input.posts_count - input.generated_posts_count - current_batch_size;

    let previous_info = if input.generated_posts_count > 0 {
        prompts::render(
            prompts::PREVIOUS_POSTS,
            &[
                ("count_run", &input.count_run.to_string()),
                ("count", &input.generated_posts_count.to_string()),
                ("total_posts_count", &total_posts.to_string()),
                ("current_batch_size", &current_batch_size.to_string()),
                ("future_posts_count", &future_posts.to_string()),
                ("description", &input.generated_posts_description),
            ],
        )
    } else if input.posts_count > current_batch_size {
        prompts::render(
            prompts::FIRST_BATCH_POSTS,
            &[
                ("total_posts_count", &total_posts.to_string()),
                ("current_batch_size", &current_batch_size.to_string()),
                ("future_posts_count", &future_posts.to_string()),
            ],
        )
    } else {
        String::new()
    };

    prompts::render(
        prompts::POST_BATCH,
        &[
            ("world_description", world_description),
            ("character_name", &detail.display_name),
            (
                "character_description",
                &format!("{} {}", detail.bio, detail.personality),
            ),
            ("interests", &detail.interests.join(", ")),
            ("speaking_style", &detail.speaking_style),
            ("common_topics", &detail.common_topics.join(", ")),
            ("appearance", &detail.appearance),
            ("secret", &detail.secret),
            ("daily_routine", &detail.daily_routine),
            ("avatar_description", &detail.avatar_description),
            ("avatar_style", &detail.avatar_style),
            ("posts_count", &current_batch_size.to_string()),
            ("previous_posts_info", &previous_info),
            (
                "structure_description",
                ResponseSchema::PostBatch.structure_template(),
            ),
        ],
    )
}

fn accumulate_description(previous: &str, posts: &[PostConcept]) -> String {
    let lines: Vec<String> = posts
        .iter()
        .map(|p| {
            format!(
                "Topic: {}. Brief: {}. Tone: {}. Type: {}.",
                p.topic, p.content_brief, p.emotional_tone, p.post_type
            )
        })
        .collect();

    let mut description = previous.to_string();
    if !lines.is_empty() {
        if !description.is_empty() {
            description.push_str("\n\n");
        }
        description.push_str(&lines.join("\n"));
    }
    description
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail() -> CharacterDetailResponse {
        CharacterDetailResponse {
            username: "fog_sailor".to_string(),
            display_name: "Mara".to_string(),
            bio: "Bottles nightmares for a living.".to_string(),
            background_story: "Grew up on the docks.".to_string(),
            personality: "wry and patient".to_string(),
            appearance: "weathered, salt-gray braids".to_string(),
            interests: vec!["tides".to_string(), "glasswork".to_string()],
            speaking_style: "clipped, nautical".to_string(),
            common_topics: vec!["the fog".to_string()],
            avatar_description: "a weathered sailor in fog".to_string(),
            avatar_style: "photorealistic".to_string(),
            relationships: vec![],
            secret: "keeps one nightmare for herself".to_string(),
            daily_routine: "dawn vigil, then the docks".to_string(),
        }
    }

    fn input() -> GeneratePostBatchInput {
        GeneratePostBatchInput {
            world_id: "world-1".to_string(),
            character_id: "char-1".to_string(),
            posts_count: 25,
            character_detail: detail(),
            generated_posts_count: 0,
            generated_posts_description: String::new(),
            count_run: 0,
            recursion_depth: 0,
            total_posts_count: Some(25),
        }
    }

    fn concept(topic: &str) -> PostConcept {
        PostConcept {
            topic: topic.to_string(),
            content_brief: format!("about {topic}"),
            has_image: false,
            emotional_tone: "wry".to_string(),
            post_type: "personal".to_string(),
            relevance_to_character: "fits".to_string(),
        }
    }

    #[test]
    fn first_batch_prompt_mentions_future_posts() {
        let prompt = build_prompt(&input(), "a world", 10, 25);
        assert!(prompt.contains("Invent 10 post concepts"));
        assert!(prompt.contains("first of several batches"));
        assert!(prompt.contains("Mara"));
        assert!(prompt.contains("clipped, nautical"));
    }

    #[test]
    fn continuation_prompt_embeds_previous_posts() {
        let mut i = input();
        i.generated_posts_count = 10;
        i.count_run = 1;
        i.generated_posts_description = "Topic: the fog.".to_string();
        let prompt = build_prompt(&i, "a world", 10, 25);
        assert!(prompt.contains("batch number 1"));
        assert!(prompt.contains("Topic: the fog."));
    }

    #[test]
    fn accumulation_joins_concepts() {
        let description =
            accumulate_description("Earlier posts.", &[concept("tides"), concept("fog")]);
        assert!(description.starts_with("Earlier posts.\n\n"));
        assert!(description.contains("Topic: tides."));
        assert!(description.contains("Topic: fog. Brief: about fog. Tone: wry. Type: personal."));
    }
}
