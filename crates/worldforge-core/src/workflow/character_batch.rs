//! Recursive character batch generation.
//!
//! Generates at most [`batch::MAX_CHARACTERS_PER_BATCH`] characters per
//! instance and schedules itself for the remainder, carrying a running
//! summary of the cast so later batches stay coherent with earlier ones.
//! Each character receives a share of the remaining post budget, normalized
//! so every character posts at least once and the batch total is exact.

use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use super::activity::ActivityOptions;
use super::batch;
use super::character::GenerateCharacterInput;
use super::{WorkflowCtx, WorkflowError};
use crate::error::LlmError;
use crate::prompts;
use crate::schemas::{CharacterBatchResponse, CharacterSeed, ResponseSchema};
use crate::storage::models::{GenerationState, Stage, TaskKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateCharacterBatchInput {
    pub world_id: String,
    /// Characters still to generate, this batch included.
    pub users_count: i64,
    /// The world's overall post budget.
    pub posts_count: i64,
    /// Posts not yet allocated to any character; defaults to `posts_count`.
    #[serde(default)]
    pub remaining_posts_count: Option<i64>,
    /// Invariant across the recursion; defaults to `users_count`.
    #[serde(default)]
    pub total_users_count: Option<i64>,
    /// Accumulated summary of previously generated characters.
    #[serde(default)]
    pub generated_characters_description: String,
    /// Characters generated by earlier batches.
    #[serde(default)]
    pub generated_count: i64,
    /// Which recursion step this is.
    #[serde(default)]
    pub count_run: i64,
    #[serde(default)]
    pub recursion_depth: i64,
}

pub async fn run(ctx: &WorkflowCtx) -> Result<Document, WorkflowError> {
    let input: GenerateCharacterBatchInput = ctx.input()?;
    let remaining_posts = input.remaining_posts_count.unwrap_or(input.posts_count);
    let total_users = input.total_users_count.unwrap_or(input.users_count);

    let max_allowed_depth =
        batch::max_allowed_depth(total_users, batch::MAX_CHARACTER_RECURSION_DEPTH);

    tracing::debug!(
        world_id = %input.world_id,
        users_count = input.users_count,
        total_users_count = total_users,
        generated_count = input.generated_count,
        recursion_depth = input.recursion_depth,
        max_allowed_depth,
        "character batch parameters",
    );

    if input.users_count <= 0 {
        ctx.update_stage(Stage::Characters, GenerationState::Completed)
            .await?;
        return Ok(doc! {
            "characters_count": 0i64,
            "total_characters_count": input.generated_count,
            "message": "no characters requested",
        });
    }

    if input.recursion_depth >= max_allowed_depth {
        tracing::warn!(world_id = %input.world_id, "maximum recursion depth reached");
        return Ok(doc! {
            "characters_count": 0i64,
            "total_characters_count": input.generated_count,
            "remaining_characters": input.users_count,
            "recursion_depth": input.recursion_depth,
            "max_allowed_depth": max_allowed_depth,
            "error": batch::DEPTH_CAP_MESSAGE,
        });
    }

    let current_batch_size = input.users_count.min(batch::MAX_CHARACTERS_PER_BATCH);
    let posts_for_batch =
        batch::posts_share(remaining_posts, current_batch_size, input.users_count);

    let world = ctx.get_world_parameters().await?;
    let prompt = build_prompt(
        &input,
        &world.format_description(),
        current_batch_size,
        posts_for_batch,
        total_users,
    );

    ctx.increment_counter("api_calls_made_LLM", 1).await?;
    let value = ctx
        .generate_structured(
            &prompt,
            ResponseSchema::CharacterBatch,
            0.9,
            8192,
            ActivityOptions::llm("generate_structured_content", 600, 3, 3, 180),
        )
        .await?;
    let response: CharacterBatchResponse = serde_json::from_value(value).map_err(|e| {
        WorkflowError::Llm(LlmError::Validation {
            schema: ResponseSchema::CharacterBatch.name().to_string(),
            message: e.to_string(),
        })
    })?;

    let mut characters = response.characters;
    tracing::info!(
        world_id = %input.world_id,
        generated = characters.len(),
        requested = current_batch_size,
        "LLM generated character batch",
    );

    // Overproduction is truncated exactly; a shortfall is accepted and the
    // continuation batch picks up the slack.
    if characters.len() as i64 > current_batch_size {
        characters.truncate(current_batch_size as usize);
    }

    if characters.is_empty() {
        tracing::warn!(world_id = %input.world_id, "no characters generated");
        return Ok(doc! {
            "characters_count": 0i64,
            "total_characters_count": input.generated_count,
            "remaining_characters": input.users_count,
            "recursion_depth": input.recursion_depth,
            "max_allowed_depth": max_allowed_depth,
            "error": "No characters generated",
        });
    }

    let mut post_counts: Vec<i64> = characters.iter().map(|c| c.posts_count).collect();
    batch::normalize_post_counts(&mut post_counts, posts_for_batch);
    for (character, count) in characters.iter_mut().zip(&post_counts) {
        character.posts_count = *count;
    }

    let description = accumulate_description(&input, &characters, &response.generated_characters_description);

    for character in &characters {
        let child_input = GenerateCharacterInput {
            world_id: input.world_id.clone(),
            character: character.clone(),
            posts_per_character: character.posts_count,
        };
        ctx.spawn_detached(TaskKind::GenerateCharacter, &child_input)
            .await?;
    }

    let produced = characters.len() as i64;
    let new_generated_count = input.generated_count + produced;
    let remaining_users = input.users_count - produced;

    if remaining_users > 0 {
        let posts_allocated: i64 = post_counts.iter().sum();
        let mut new_remaining_posts = remaining_posts - posts_allocated;
        if new_remaining_posts < remaining_users {
            // Preserve at least one post for every future character.
            new_remaining_posts = remaining_users;
        }

        if input.recursion_depth + 1 < max_allowed_depth {
            let next_input = GenerateCharacterBatchInput {
                world_id: input.world_id.clone(),
                users_count: remaining_users,
                posts_count: input.posts_count,
                remaining_posts_count: Some(new_remaining_posts),
                total_users_count: Some(total_users),
                generated_characters_description: description.clone(),
                generated_count: new_generated_count,
                count_run: input.count_run + 1,
                recursion_depth: input.recursion_depth + 1,
            };
            ctx.spawn_detached(TaskKind::GenerateCharacterBatch, &next_input)
                .await?;
            tracing::info!(
                world_id = %input.world_id,
                remaining_users,
                "scheduled next character batch",
            );
        } else {
            tracing::warn!(
                world_id = %input.world_id,
                remaining_users,
                "depth cap prevents another batch; remaining characters will not be generated",
            );
        }
    } else {
        ctx.update_stage(Stage::Characters, GenerationState::Completed)
            .await?;
    }

    tracing::info!(
        world_id = %input.world_id,
        produced,
        total = new_generated_count,
        "character batch completed",
    );
    Ok(doc! {
        "characters_count": produced,
        "total_characters_count": new_generated_count,
        "remaining_characters": remaining_users,
        "recursion_depth": input.recursion_depth,
        "generated_characters_description": description,
    })
}

fn build_prompt(
    input: &GenerateCharacterBatchInput,
    world_description: &str,
    current_batch_size: i64,
    posts_for_batch: i64,
    total_users: i64,
) -> String {
    let future_users = input.users_count - current_batch_size;

    let previous_info = if input.generated_count > 0 {
        prompts::render(
            prompts::PREVIOUS_CHARACTERS,
            &[
                ("count_run", &input.count_run.to_string()),
                ("count", &input.generated_count.to_string()),
                ("total_users_count", &total_users.to_string()),
                ("current_batch_size", &current_batch_size.to_string()),
                ("future_users_count", &future_users.to_string()),
                ("description", &input.generated_characters_description),
            ],
        )
    } else if input.users_count > current_batch_size {
        prompts::render(
            prompts::FIRST_BATCH_CHARACTERS,
            &[
                ("total_users_count", &total_users.to_string()),
                ("current_batch_size", &current_batch_size.to_string()),
                ("future_users_count", &future_users.to_string()),
            ],
        )
    } else {
        String::new()
    };

    prompts::render(
        prompts::CHARACTER_BATCH,
        &[
            ("world_description", world_description),
            ("users_count", &current_batch_size.to_string()),
            ("posts_count", &posts_for_batch.to_string()),
            ("previous_characters_info", &previous_info),
            (
                "structure_description",
                ResponseSchema::CharacterBatch.structure_template(),
            ),
        ],
    )
}

/// Extend the running cast summary with this batch.
///
/// The model's own summary wins when present: it has seen everything and
/// writes a tighter brief than concatenation does.
fn accumulate_description(
    input: &GenerateCharacterBatchInput,
    characters: &[CharacterSeed],
    llm_description: &str,
) -> String {
    if !llm_description.is_empty() {
        return llm_description.to_string();
    }

    let lines: Vec<String> = characters
        .iter()
        .map(|c| {
            format!(
                "{} Role: {}. Traits: {}.",
                c.concept_short,
                c.role_in_world,
                c.personality_traits.join(", ")
            )
        })
        .collect();

    let mut description = input.generated_characters_description.clone();
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

    fn seed(short: &str, posts: i64) -> CharacterSeed {
        CharacterSeed {
            concept: format!("{short} full concept"),
            concept_short: short.to_string(),
            role_in_world: "citizen".to_string(),
            posts_count: posts,
            personality_traits: vec!["curious".to_string(), "wry".to_string()],
            interests: vec!["tides".to_string()],
        }
    }

    fn input() -> GenerateCharacterBatchInput {
        GenerateCharacterBatchInput {
            world_id: "world-1".to_string(),
            users_count: 25,
            posts_count: 100,
            remaining_posts_count: Some(100),
            total_users_count: Some(25),
            generated_characters_description: String::new(),
            generated_count: 0,
            count_run: 0,
            recursion_depth: 0,
        }
    }

    #[test]
    fn first_batch_prompt_warns_about_future_batches() {
        let prompt = build_prompt(&input(), "a world", 10, 40, 25);
        assert!(prompt.contains("first of several batches"));
        assert!(prompt.contains("Invent 10 distinct characters"));
        assert!(prompt.contains("total of 40 posts"));
    }

    #[test]
    fn continuation_prompt_embeds_previous_characters() {
        let mut i = input();
        i.generated_count = 10;
        i.count_run = 1;
        i.users_count = 15;
        i.generated_characters_description = "Nightmare bottler. Role: artisan.".to_string();
        let prompt = build_prompt(&i, "a world", 10, 40, 25);
        assert!(prompt.contains("batch number 1"));
        assert!(prompt.contains("Nightmare bottler. Role: artisan."));
        assert!(!prompt.contains("first of several batches"));
    }

    #[test]
    fn single_batch_prompt_has_no_continuation_notice() {
        let mut i = input();
        i.users_count = 5;
        i.total_users_count = Some(5);
        let prompt = build_prompt(&i, "a world", 5, 20, 5);
        assert!(!prompt.contains("first of several batches"));
        assert!(!prompt.contains("batch number"));
    }

    #[test]
    fn accumulation_prefers_model_summary() {
        let description = accumulate_description(&input(), &[seed("A", 2)], "model summary");
        assert_eq!(description, "model summary");
    }

    #[test]
    fn accumulation_appends_to_previous_description() {
        let mut i = input();
        i.generated_characters_description = "Existing cast.".to_string();
        let description = accumulate_description(&i, &[seed("A", 2), seed("B", 3)], "");
        assert!(description.starts_with("Existing cast.\n\n"));
        assert!(description.contains("A Role: citizen. Traits: curious, wry."));
        assert!(description.contains("B Role: citizen."));
    }
}
