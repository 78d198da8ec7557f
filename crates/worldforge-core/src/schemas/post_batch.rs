//! Response shape for one post sub-batch.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Concept for one post, expanded later by the post-detail workflow.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PostConcept {
    /// Topic of the post
    pub topic: String,
    /// Short summary of the content, 2-3 sentences
    pub content_brief: String,
    /// Whether the post should carry a generated image
    pub has_image: bool,
    /// Emotional tone of the post
    pub emotional_tone: String,
    /// Kind of post: personal, news, question
    pub post_type: String,
    /// How the post reflects the character's personality
    pub relevance_to_character: String,
}

/// Structured LLM response for a post batch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PostBatchResponse {
    /// Concepts for the generated posts
    pub posts: Vec<PostConcept>,
    /// Narrative arc connecting all the posts
    pub narrative_arc: String,
    /// How the posts show the character developing
    pub character_development: String,
    /// Rough publication schedule for the posts
    #[serde(default)]
    pub posting_schedule: Vec<String>,
    /// Themes that recur across the character's posts
    #[serde(default)]
    pub recurring_themes: Vec<String>,
}
