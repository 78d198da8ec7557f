//! World-description response shape and its prompt-text rendering.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Extra details and peculiarities of the world.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AdditionalDetails {
    /// Climate and weather conditions
    pub climate: String,
    /// Main resources and how they are distributed
    pub resources: String,
    /// Central conflicts and tensions
    pub conflicts: String,
    /// Important traditions and customs
    pub traditions: String,
    /// How technology is used in daily life
    pub technology: String,
    /// The magic system, if the world has one
    pub magic_system: String,
    /// Time period of the world
    pub time_period: String,
    /// Peculiarities of language and communication
    pub language: String,
    /// Unique details of the world that do not fit the main structure
    #[serde(default)]
    pub custom_details: Vec<String>,
}

/// Preferences extracted from the user's prompt.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UserPreferences {
    /// Language the world should be generated in
    pub language: String,
    /// Additional user preferences taken from the prompt, if any
    #[serde(default)]
    pub other_preferences: Vec<String>,
}

/// Structured LLM response for world-description generation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorldDescriptionResponse {
    /// Name of the world, unique and memorable, reflecting its essence
    pub name: String,
    /// Preferences extracted from the user prompt
    pub user_preferences: UserPreferences,
    /// Short description of the world, 2-3 sentences
    pub description_short: String,
    /// Detailed description of the world, 1-5 paragraphs
    pub description: String,
    /// Central theme of the world
    pub theme: String,
    /// Level of technological development
    pub technology_level: String,
    /// Social structure of the society
    pub social_structure: String,
    /// Cultural peculiarities of the world
    pub culture: String,
    /// Geographic features of the world
    pub geography: String,
    /// Visual style of the world: color palette and artistic direction
    pub visual_style: String,
    /// History of the world
    pub history: String,
    /// Common occupations and activities in this world, 5-20 or more
    pub common_activities: Vec<String>,
    /// Typical stories and plots that happen in this world, 5-20 or more
    pub typical_stories: Vec<String>,
    /// Extra details: climate, resources, conflicts, traditions, technology, magic, time period, language
    pub additional_details: AdditionalDetails,
}

impl WorldDescriptionResponse {
    /// Render the world as the labeled text block the prompt templates embed.
    pub fn format_description(&self) -> String {
        let mut lines = vec![
            format!("World name: {}", self.name),
            format!("Short description: {}", self.description_short),
            format!("Description: {}", self.description),
            format!("Theme: {}", self.theme),
            format!("Technology level: {}", self.technology_level),
            format!("Social structure: {}", self.social_structure),
            format!("Culture: {}", self.culture),
            format!("Geography: {}", self.geography),
            format!("Visual style: {}", self.visual_style),
            format!("History: {}", self.history),
            format!("Common activities: {}", self.common_activities.join(", ")),
            format!("Typical stories: {}", self.typical_stories.join(", ")),
        ];

        let details = &self.additional_details;
        lines.push("Additional details:".to_string());
        lines.push(format!("  Climate: {}", details.climate));
        lines.push(format!("  Resources: {}", details.resources));
        lines.push(format!("  Conflicts: {}", details.conflicts));
        lines.push(format!("  Traditions: {}", details.traditions));
        lines.push(format!("  Technology: {}", details.technology));
        lines.push(format!("  Magic system: {}", details.magic_system));
        lines.push(format!("  Time period: {}", details.time_period));
        lines.push(format!("  Language: {}", details.language));
        if !details.custom_details.is_empty() {
            lines.push(format!(
                "  Other details: {}",
                details.custom_details.join("; ")
            ));
        }

        lines.push(format!(
            "Target language: {}",
            self.user_preferences.language
        ));
        if !self.user_preferences.other_preferences.is_empty() {
            lines.push(format!(
                "User preferences: {}",
                self.user_preferences.other_preferences.join("; ")
            ));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
pub(crate) fn sample_world() -> WorldDescriptionResponse {
    WorldDescriptionResponse {
        name: "Somnia".to_string(),
        user_preferences: UserPreferences {
            language: "English".to_string(),
            other_preferences: vec![],
        },
        description_short: "Dreams take physical form at night.".to_string(),
        description: "A reality where dreams materialize as objects that vanish at dawn."
            .to_string(),
        theme: "oneiric surrealism".to_string(),
        technology_level: "early industrial".to_string(),
        social_structure: "dream-guilds".to_string(),
        culture: "night markets trading in bottled dreams".to_string(),
        geography: "a single coastal city ringed by fog".to_string(),
        visual_style: "soft pastels with deep indigo shadows".to_string(),
        history: "Founded after the First Waking.".to_string(),
        common_activities: vec!["dream-bottling".to_string(), "fog-sailing".to_string()],
        typical_stories: vec!["a dream that refused to vanish".to_string()],
        additional_details: AdditionalDetails {
            climate: "mild, perpetually foggy".to_string(),
            resources: "condensed dreamstuff".to_string(),
            conflicts: "guild rivalry over lucid territory".to_string(),
            traditions: "dawn vigils".to_string(),
            technology: "brass dream-condensers".to_string(),
            magic_system: "lucidity as currency".to_string(),
            time_period: "equivalent to the 1890s".to_string(),
            language: "shared trade tongue".to_string(),
            custom_details: vec![],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_description_includes_core_fields() {
        let text = sample_world().format_description();
        assert!(text.contains("World name: Somnia"));
        assert!(text.contains("Theme: oneiric surrealism"));
        assert!(text.contains("Common activities: dream-bottling, fog-sailing"));
        assert!(text.contains("  Magic system: lucidity as currency"));
        assert!(text.contains("Target language: English"));
    }

    #[test]
    fn empty_custom_details_are_omitted() {
        let text = sample_world().format_description();
        assert!(!text.contains("Other details:"));
    }

    #[test]
    fn response_round_trips_through_json() {
        let world = sample_world();
        let json = serde_json::to_string(&world).expect("serialize");
        let back: WorldDescriptionResponse = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.name, world.name);
        assert_eq!(back.additional_details.climate, world.additional_details.climate);
    }
}
