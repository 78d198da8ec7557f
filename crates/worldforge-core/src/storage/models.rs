//! Document models for the four MongoDB collections.

use mongodb::bson::{DateTime, Document};
use serde::{Deserialize, Serialize};

use crate::schemas::world_description::WorldDescriptionResponse;

/// Lifecycle of a task document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The nine workflow kinds a task document can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    InitWorldCreation,
    GenerateWorldDescription,
    GenerateWorldImage,
    GenerateCharacterBatch,
    GenerateCharacter,
    GenerateCharacterAvatar,
    GeneratePostBatch,
    GeneratePost,
    GeneratePostImage,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::InitWorldCreation => "init_world_creation",
            TaskKind::GenerateWorldDescription => "generate_world_description",
            TaskKind::GenerateWorldImage => "generate_world_image",
            TaskKind::GenerateCharacterBatch => "generate_character_batch",
            TaskKind::GenerateCharacter => "generate_character",
            TaskKind::GenerateCharacterAvatar => "generate_character_avatar",
            TaskKind::GeneratePostBatch => "generate_post_batch",
            TaskKind::GeneratePost => "generate_post",
            TaskKind::GeneratePostImage => "generate_post_image",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one scheduled workflow step.
///
/// The `parameters` document is the workflow's full input; only the task id
/// travels between workflows, which keeps workflow arguments bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub world_id: String,
    pub status: TaskStatus,
    pub parameters: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempt_count: i64,
    #[serde(default)]
    pub worker_id: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Task {
    /// A fresh, unclaimed task.
    pub fn new(id: String, kind: TaskKind, world_id: String, parameters: Document) -> Self {
        let now = DateTime::now();
        Self {
            id,
            kind,
            world_id,
            status: TaskStatus::Pending,
            parameters,
            result: None,
            error: None,
            attempt_count: 0,
            worker_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status shared by stages and the overall world record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl GenerationState {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationState::Pending => "pending",
            GenerationState::InProgress => "in_progress",
            GenerationState::Completed => "completed",
            GenerationState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for GenerationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The six generation phases of a world, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    WorldDescription,
    WorldImage,
    Characters,
    Posts,
    Finishing,
}

impl Stage {
    /// All stages in the order they appear in the ledger document.
    pub const ALL: [Stage; 6] = [
        Stage::Initializing,
        Stage::WorldDescription,
        Stage::WorldImage,
        Stage::Characters,
        Stage::Posts,
        Stage::Finishing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initializing => "initializing",
            Stage::WorldDescription => "world_description",
            Stage::WorldImage => "world_image",
            Stage::Characters => "characters",
            Stage::Posts => "posts",
            Stage::Finishing => "finishing",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage entry in the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageEntry {
    pub name: Stage,
    pub status: GenerationState,
}

/// Capacity parameters the world was requested with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub users_count: i64,
    pub posts_count: i64,
    pub user_prompt: String,
}

/// Per-world progress and cost ledger.
///
/// Mutated only through atomic `$inc` (counters, costs) and staged
/// transitions; concurrent workers therefore compose without locks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldGenerationStatus {
    #[serde(rename = "_id")]
    pub world_id: String,
    pub status: GenerationState,
    pub current_stage: Stage,
    pub stages: Vec<StageEntry>,
    pub tasks_total: i64,
    pub tasks_completed: i64,
    pub tasks_failed: i64,
    pub users_predicted: i64,
    pub users_created: i64,
    pub posts_predicted: i64,
    pub posts_created: i64,
    #[serde(rename = "api_call_limits_LLM")]
    pub api_call_limits_llm: i64,
    #[serde(rename = "api_calls_made_LLM")]
    pub api_calls_made_llm: i64,
    pub api_call_limits_images: i64,
    pub api_calls_made_images: i64,
    /// Accumulated LLM spend, USD.
    pub llm_cost: f64,
    /// Accumulated image spend, USD.
    pub image_cost: f64,
    pub parameters: GenerationParameters,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

/// Stored world parameters: the generated description plus document metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldParameters {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub world: WorldDescriptionResponse,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

/// Which external API a history record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    Llm,
    Image,
    Grpc,
}

/// Append-only audit record of one external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequestHistory {
    #[serde(rename = "_id")]
    pub id: String,
    pub api_type: ApiType,
    pub task_id: String,
    pub world_id: String,
    pub request_type: String,
    pub request_data: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: i64,
    pub created_at: DateTime,
}

impl ApiRequestHistory {
    /// New record stamped with a fresh id and the current time.
    pub fn new(
        api_type: ApiType,
        task_id: impl Into<String>,
        world_id: impl Into<String>,
        request_type: impl Into<String>,
        request_data: Document,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            api_type,
            task_id: task_id.into(),
            world_id: world_id.into(),
            request_type: request_type.into(),
            request_data,
            response_data: None,
            error: None,
            duration_ms: 0,
            created_at: DateTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_kind_serializes_to_snake_case() {
        let json = serde_json::to_string(&TaskKind::GenerateCharacterBatch).expect("json");
        assert_eq!(json, "\"generate_character_batch\"");
    }

    #[test]
    fn task_kind_round_trips() {
        for kind in [
            TaskKind::InitWorldCreation,
            TaskKind::GenerateWorldDescription,
            TaskKind::GenerateWorldImage,
            TaskKind::GenerateCharacterBatch,
            TaskKind::GenerateCharacter,
            TaskKind::GenerateCharacterAvatar,
            TaskKind::GeneratePostBatch,
            TaskKind::GeneratePost,
            TaskKind::GeneratePostImage,
        ] {
            let json = format!("\"{}\"", kind.as_str());
            let parsed: TaskKind = serde_json::from_str(&json).expect("parse");
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn stage_order_matches_pipeline() {
        let names: Vec<&str> = Stage::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            [
                "initializing",
                "world_description",
                "world_image",
                "characters",
                "posts",
                "finishing"
            ]
        );
    }

    #[test]
    fn generation_state_serializes_to_snake_case() {
        let json = serde_json::to_string(&GenerationState::InProgress).expect("json");
        assert_eq!(json, "\"in_progress\"");
    }
}
