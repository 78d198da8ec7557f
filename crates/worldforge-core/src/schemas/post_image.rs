//! Response shape for the post-image prompt-optimization call.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured LLM response carrying the optimized post-image prompt.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PostImagePromptResponse {
    /// The optimized prompt for generating the post image
    pub prompt: String,
}
