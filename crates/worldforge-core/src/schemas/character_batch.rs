//! Response shape for one character sub-batch.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Seed description of one character, expanded later by the detail workflow.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CharacterSeed {
    /// Character concept, 2-4 sentences
    pub concept: String,
    /// One-line version of the concept
    pub concept_short: String,
    /// The character's role in the world
    pub role_in_world: String,
    /// How many posts this character will author
    pub posts_count: i64,
    /// Key personality traits
    pub personality_traits: Vec<String>,
    /// The character's interests
    pub interests: Vec<String>,
}

/// A relationship between two characters of the batch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CharacterConnection {
    /// Name of the first character
    pub character1_name: String,
    /// Name of the second character
    pub character2_name: String,
    /// Kind of connection: family, friendship, professional, rivalry
    pub connection_type: String,
    /// Description of the connection
    pub description: String,
}

/// Structured LLM response for a character batch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CharacterBatchResponse {
    /// Seed descriptions of the generated characters
    pub characters: Vec<CharacterSeed>,
    /// The shared understanding of the world these characters reflect
    pub world_interpretation: String,
    /// Connections between the generated characters
    #[serde(default)]
    pub character_connections: Vec<CharacterConnection>,
    /// Running summary of all characters generated so far, used to brief the next batch
    #[serde(default)]
    pub generated_characters_description: String,
}
