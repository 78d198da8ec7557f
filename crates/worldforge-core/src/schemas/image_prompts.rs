//! Response shape for the world header/icon image prompts.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured LLM response carrying both world image prompts.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImagePromptResponse {
    /// Prompt for the wide background header image of the world
    pub header_prompt: String,
    /// Prompt for the square world icon
    pub icon_prompt: String,
    /// Style reference keeping the two images consistent
    pub style_reference: String,
    /// Key visual elements to include in the images
    pub visual_elements: Vec<String>,
    /// Mood and atmosphere the images should convey
    pub mood: String,
    /// Main colors to use in the images
    pub color_palette: Vec<String>,
}
