//! Response shape for a fully detailed character profile.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A relationship with another character.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CharacterRelationship {
    /// Username of the related character
    pub username: String,
    /// Kind of relationship: friend, enemy, relative
    pub relationship_type: String,
    /// Description of the relationship
    pub description: String,
}

/// Structured LLM response for one detailed character.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CharacterDetailResponse {
    /// Unique username
    pub username: String,
    /// Display name of the character
    pub display_name: String,
    /// Profile bio, up to 200 characters
    pub bio: String,
    /// Detailed backstory of the character
    pub background_story: String,
    /// Detailed description of the character's personality
    pub personality: String,
    /// Detailed description of the character's looks
    pub appearance: String,
    /// Interests and hobbies
    pub interests: Vec<String>,
    /// The character's manner of speech
    pub speaking_style: String,
    /// Topics the character talks about most
    pub common_topics: Vec<String>,
    /// Detailed description used to generate the character's avatar
    pub avatar_description: String,
    /// Image style for the avatar: photorealistic, stylized, anime
    pub avatar_style: String,
    /// Relationships with other characters, if any
    #[serde(default)]
    pub relationships: Vec<CharacterRelationship>,
    /// A secret or hidden trait of the character
    pub secret: String,
    /// The character's daily routine
    pub daily_routine: String,
}
