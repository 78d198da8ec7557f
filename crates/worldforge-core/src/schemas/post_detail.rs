//! Response shape for one fully written post.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured LLM response for one post.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PostDetailResponse {
    /// Full text of the post
    pub content: String,
    /// Prompt for the post's image, if it has one
    #[serde(default)]
    pub image_prompt: Option<String>,
    /// Image style for the post
    #[serde(default)]
    pub image_style: Option<String>,
    /// Hashtags for the post
    pub hashtags: Vec<String>,
    /// Mood of the post
    pub mood: String,
    /// What was happening to the character when the post was written
    pub context: String,
    /// Mentions of other characters, if any
    #[serde(default)]
    pub mentions: Vec<String>,
    /// Where the post was written, if relevant
    #[serde(default)]
    pub location: Option<String>,
    /// Time of day the post was written, if relevant
    #[serde(default)]
    pub time_of_day: Option<String>,
}
