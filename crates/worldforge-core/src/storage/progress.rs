//! Per-world progress and cost ledger.
//!
//! The ledger is the single source of truth for a world's generation state.
//! Counters and costs only ever move through `$inc`, so totals are correct
//! under any interleaving of workers; stage transitions recompute the
//! derived overall status in one read-modify-write.

use mongodb::bson::{doc, DateTime, Document};

use super::models::{
    GenerationParameters, GenerationState, Stage, StageEntry, WorldGenerationStatus,
};
use super::{Storage, WORLD_GENERATION_STATUS};
use crate::error::StorageError;

/// Counter fields a workflow may increment. Anything else is a bug.
pub const COUNTER_FIELDS: [&str; 7] = [
    "tasks_total",
    "tasks_completed",
    "tasks_failed",
    "users_created",
    "posts_created",
    "api_calls_made_LLM",
    "api_calls_made_images",
];

/// Which spend bucket a cost increment lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostKind {
    Llm,
    Image,
}

impl CostKind {
    pub fn field(self) -> &'static str {
        match self {
            CostKind::Llm => "llm_cost",
            CostKind::Image => "image_cost",
        }
    }
}

/// Derive the overall status from the per-stage statuses.
///
/// FAILED wins over everything; COMPLETED requires every stage to be
/// completed; anything else is still IN_PROGRESS.
pub fn derive_overall(stages: &[StageEntry]) -> GenerationState {
    if stages.iter().any(|s| s.status == GenerationState::Failed) {
        GenerationState::Failed
    } else if stages.iter().all(|s| s.status == GenerationState::Completed) {
        GenerationState::Completed
    } else {
        GenerationState::InProgress
    }
}

/// Apply one stage transition to a stage list, returning the derived overall
/// status. Pure so the transition table is unit-testable.
pub fn apply_stage_update(
    stages: &mut [StageEntry],
    stage: Stage,
    status: GenerationState,
) -> GenerationState {
    for entry in stages.iter_mut() {
        if entry.name == stage {
            entry.status = status;
        }
    }
    derive_overall(stages)
}

impl Storage {
    /// Create the ledger document for a new world.
    ///
    /// INITIALIZING starts in progress (the init task is running right now)
    /// and `tasks_total` starts at 1 to count that task. A second
    /// initialization of the same world fails with a duplicate-key error.
    pub async fn initialize_world(
        &self,
        world_id: &str,
        users_predicted: i64,
        posts_predicted: i64,
        user_prompt: &str,
        llm_limit: i64,
        images_limit: i64,
    ) -> Result<WorldGenerationStatus, StorageError> {
        let now = DateTime::now();
        let stages = Stage::ALL
            .iter()
            .map(|&name| StageEntry {
                name,
                status: if name == Stage::Initializing {
                    GenerationState::InProgress
                } else {
                    GenerationState::Pending
                },
            })
            .collect();

        let status = WorldGenerationStatus {
            world_id: world_id.to_string(),
            status: GenerationState::InProgress,
            current_stage: Stage::Initializing,
            stages,
            tasks_total: 1,
            tasks_completed: 0,
            tasks_failed: 0,
            users_predicted,
            users_created: 0,
            posts_predicted,
            posts_created: 0,
            api_call_limits_llm: llm_limit,
            api_calls_made_llm: 0,
            api_call_limits_images: images_limit,
            api_calls_made_images: 0,
            llm_cost: 0.0,
            image_cost: 0.0,
            parameters: GenerationParameters {
                users_count: users_predicted,
                posts_count: posts_predicted,
                user_prompt: user_prompt.to_string(),
            },
            created_at: now,
            updated_at: now,
        };

        let _permit = self.permit().await;
        self.status_collection()
            .insert_one(&status)
            .await
            .map_err(|e| StorageError::from_insert(e, WORLD_GENERATION_STATUS, world_id))?;
        tracing::info!(world_id, "initialized world generation ledger");
        Ok(status)
    }

    pub async fn get_world_status(
        &self,
        world_id: &str,
    ) -> Result<Option<WorldGenerationStatus>, StorageError> {
        let _permit = self.permit().await;
        Ok(self
            .status_collection()
            .find_one(doc! {"_id": world_id})
            .await?)
    }

    /// Transition one stage and recompute the derived overall status.
    ///
    /// `current_stage` moves to the transitioned stage only when the new
    /// stage status is IN_PROGRESS (parallel stages each set it as they
    /// start; completions leave it alone).
    pub async fn update_stage(
        &self,
        world_id: &str,
        stage: Stage,
        status: GenerationState,
    ) -> Result<WorldGenerationStatus, StorageError> {
        let _permit = self.permit().await;
        let mut current = self
            .status_collection()
            .find_one(doc! {"_id": world_id})
            .await?
            .ok_or_else(|| StorageError::NotFound {
                collection: WORLD_GENERATION_STATUS,
                id: world_id.to_string(),
            })?;

        let overall = apply_stage_update(&mut current.stages, stage, status);
        current.status = overall;
        if status == GenerationState::InProgress {
            current.current_stage = stage;
        }
        current.updated_at = DateTime::now();

        let stages = mongodb::bson::to_bson(&current.stages)?;
        self.status_collection()
            .update_one(
                doc! {"_id": world_id},
                doc! {"$set": {
                    "stages": stages,
                    "current_stage": current.current_stage.as_str(),
                    "status": overall.as_str(),
                    "updated_at": current.updated_at,
                }},
            )
            .await?;

        tracing::info!(
            world_id,
            stage = %stage,
            stage_status = %status,
            overall = %overall,
            "updated generation stage",
        );
        Ok(current)
    }

    /// Atomically increment one whitelisted counter.
    pub async fn increment_counter(
        &self,
        world_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), StorageError> {
        if !COUNTER_FIELDS.contains(&field) {
            return Err(StorageError::InvalidCounterField {
                field: field.to_string(),
            });
        }

        let _permit = self.permit().await;
        let result = self
            .status_collection()
            .update_one(
                doc! {"_id": world_id},
                doc! {
                    "$inc": {field: delta},
                    "$set": {"updated_at": DateTime::now()},
                },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StorageError::NotFound {
                collection: WORLD_GENERATION_STATUS,
                id: world_id.to_string(),
            });
        }
        tracing::debug!(world_id, field, delta, "incremented counter");
        Ok(())
    }

    /// Atomically add spend to one cost bucket.
    pub async fn increment_cost(
        &self,
        world_id: &str,
        kind: CostKind,
        cost: f64,
    ) -> Result<(), StorageError> {
        let _permit = self.permit().await;
        let result = self
            .status_collection()
            .update_one(
                doc! {"_id": world_id},
                doc! {
                    "$inc": {kind.field(): cost},
                    "$set": {"updated_at": DateTime::now()},
                },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StorageError::NotFound {
                collection: WORLD_GENERATION_STATUS,
                id: world_id.to_string(),
            });
        }
        Ok(())
    }

    /// Generic multi-field `$set` with an automatic `updated_at`.
    pub async fn update_progress(
        &self,
        world_id: &str,
        mut updates: Document,
    ) -> Result<(), StorageError> {
        if updates.is_empty() {
            return Ok(());
        }
        updates.insert("updated_at", DateTime::now());

        let _permit = self.permit().await;
        let result = self
            .status_collection()
            .update_one(doc! {"_id": world_id}, doc! {"$set": updates})
            .await?;
        if result.matched_count == 0 {
            return Err(StorageError::NotFound {
                collection: WORLD_GENERATION_STATUS,
                id: world_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stages_with(overrides: &[(Stage, GenerationState)]) -> Vec<StageEntry> {
        Stage::ALL
            .iter()
            .map(|&name| StageEntry {
                name,
                status: overrides
                    .iter()
                    .find(|(s, _)| *s == name)
                    .map_or(GenerationState::Pending, |(_, st)| *st),
            })
            .collect()
    }

    #[test]
    fn overall_is_in_progress_by_default() {
        let stages = stages_with(&[(Stage::Initializing, GenerationState::Completed)]);
        assert_eq!(derive_overall(&stages), GenerationState::InProgress);
    }

    #[test]
    fn any_failed_stage_fails_the_world() {
        let stages = stages_with(&[
            (Stage::Initializing, GenerationState::Completed),
            (Stage::WorldImage, GenerationState::Failed),
            (Stage::Characters, GenerationState::Completed),
        ]);
        assert_eq!(derive_overall(&stages), GenerationState::Failed);
    }

    #[test]
    fn all_completed_completes_the_world() {
        let stages = stages_with(
            &Stage::ALL
                .iter()
                .map(|&s| (s, GenerationState::Completed))
                .collect::<Vec<_>>(),
        );
        assert_eq!(derive_overall(&stages), GenerationState::Completed);
    }

    #[test]
    fn failed_wins_over_completed() {
        let mut entries = stages_with(
            &Stage::ALL
                .iter()
                .map(|&s| (s, GenerationState::Completed))
                .collect::<Vec<_>>(),
        );
        let overall = apply_stage_update(&mut entries, Stage::Posts, GenerationState::Failed);
        assert_eq!(overall, GenerationState::Failed);
    }

    #[test]
    fn apply_stage_update_only_touches_named_stage() {
        let mut entries = stages_with(&[]);
        apply_stage_update(&mut entries, Stage::Characters, GenerationState::InProgress);
        for entry in &entries {
            if entry.name == Stage::Characters {
                assert_eq!(entry.status, GenerationState::InProgress);
            } else {
                assert_eq!(entry.status, GenerationState::Pending);
            }
        }
    }

    #[test]
    fn counter_whitelist_covers_expected_fields() {
        assert!(COUNTER_FIELDS.contains(&"tasks_total"));
        assert!(COUNTER_FIELDS.contains(&"api_calls_made_LLM"));
        assert!(!COUNTER_FIELDS.contains(&"users_predicted"));
        assert!(!COUNTER_FIELDS.contains(&"llm_cost"));
    }

    #[test]
    fn cost_kind_maps_to_ledger_fields() {
        assert_eq!(CostKind::Llm.field(), "llm_cost");
        assert_eq!(CostKind::Image.field(), "image_cost");
    }
}
