//! Response shape for the avatar prompt-optimization call.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured LLM response carrying the optimized avatar prompt.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CharacterAvatarPromptResponse {
    /// The optimized prompt for generating the character avatar image
    pub prompt: String,
}
