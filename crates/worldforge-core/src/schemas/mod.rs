//! Typed LLM response shapes and the schema registry.
//!
//! Workflow code is deterministic and must not touch concrete schema types,
//! so it passes a symbolic *name* down to the LLM activity; the activity
//! resolves the name here into a normalized JSON schema (for the request),
//! a validator (for the response) and a rendered structure description (for
//! the prompt). The name strings are the stable contract between the two
//! layers.

pub mod character_avatar;
pub mod character_batch;
pub mod character_detail;
pub mod image_prompts;
pub mod post_batch;
pub mod post_detail;
pub mod post_image;
pub mod world_description;

use std::collections::HashMap;
use std::sync::OnceLock;

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::llm::schema::normalize;
use crate::llm::template::render_structure;

pub use character_avatar::CharacterAvatarPromptResponse;
pub use character_batch::{CharacterBatchResponse, CharacterConnection, CharacterSeed};
pub use character_detail::{CharacterDetailResponse, CharacterRelationship};
pub use image_prompts::ImagePromptResponse;
pub use post_batch::{PostBatchResponse, PostConcept};
pub use post_detail::PostDetailResponse;
pub use post_image::PostImagePromptResponse;
pub use world_description::WorldDescriptionResponse;

/// The response shapes the pipeline can request from the LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseSchema {
    WorldDescription,
    ImagePrompts,
    CharacterBatch,
    CharacterDetail,
    PostBatch,
    PostDetail,
    CharacterAvatarPrompt,
    PostImagePrompt,
}

struct SchemaEntry {
    schema: Value,
    template: String,
}

fn registry() -> &'static HashMap<&'static str, SchemaEntry> {
    static REGISTRY: OnceLock<HashMap<&'static str, SchemaEntry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        fn entry<T: JsonSchema>() -> SchemaEntry {
            let raw = serde_json::to_value(schema_for!(T)).expect("schema serializes");
            let schema = normalize(raw);
            let template = render_structure(&schema);
            SchemaEntry { schema, template }
        }

        let mut map = HashMap::new();
        map.insert(
            ResponseSchema::WorldDescription.name(),
            entry::<WorldDescriptionResponse>(),
        );
        map.insert(ResponseSchema::ImagePrompts.name(), entry::<ImagePromptResponse>());
        map.insert(
            ResponseSchema::CharacterBatch.name(),
            entry::<CharacterBatchResponse>(),
        );
        map.insert(
            ResponseSchema::CharacterDetail.name(),
            entry::<CharacterDetailResponse>(),
        );
        map.insert(ResponseSchema::PostBatch.name(), entry::<PostBatchResponse>());
        map.insert(ResponseSchema::PostDetail.name(), entry::<PostDetailResponse>());
        map.insert(
            ResponseSchema::CharacterAvatarPrompt.name(),
            entry::<CharacterAvatarPromptResponse>(),
        );
        map.insert(
            ResponseSchema::PostImagePrompt.name(),
            entry::<PostImagePromptResponse>(),
        );
        map
    })
}

impl ResponseSchema {
    pub const ALL: [ResponseSchema; 8] = [
        ResponseSchema::WorldDescription,
        ResponseSchema::ImagePrompts,
        ResponseSchema::CharacterBatch,
        ResponseSchema::CharacterDetail,
        ResponseSchema::PostBatch,
        ResponseSchema::PostDetail,
        ResponseSchema::CharacterAvatarPrompt,
        ResponseSchema::PostImagePrompt,
    ];

    /// The symbolic name workflows pass across the activity boundary.
    pub fn name(self) -> &'static str {
        match self {
            ResponseSchema::WorldDescription => "WorldDescriptionResponse",
            ResponseSchema::ImagePrompts => "ImagePromptResponse",
            ResponseSchema::CharacterBatch => "CharacterBatchResponse",
            ResponseSchema::CharacterDetail => "CharacterDetailResponse",
            ResponseSchema::PostBatch => "PostBatchResponse",
            ResponseSchema::PostDetail => "PostDetailResponse",
            ResponseSchema::CharacterAvatarPrompt => "CharacterAvatarPromptResponse",
            ResponseSchema::PostImagePrompt => "PostImagePromptResponse",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|schema| schema.name() == name)
    }

    /// The normalized JSON schema sent in `response_format`.
    pub fn normalized_schema(self) -> &'static Value {
        &registry()[self.name()].schema
    }

    /// The rendered structure description embedded in prompts.
    pub fn structure_template(self) -> &'static str {
        &registry()[self.name()].template
    }

    /// Check a parsed response against the typed shape.
    pub fn validate(self, value: &Value) -> Result<(), String> {
        fn check<T: DeserializeOwned>(value: &Value) -> Result<(), String> {
            serde_json::from_value::<T>(value.clone())
                .map(|_| ())
                .map_err(|e| e.to_string())
        }

        match self {
            ResponseSchema::WorldDescription => check::<WorldDescriptionResponse>(value),
            ResponseSchema::ImagePrompts => check::<ImagePromptResponse>(value),
            ResponseSchema::CharacterBatch => check::<CharacterBatchResponse>(value),
            ResponseSchema::CharacterDetail => check::<CharacterDetailResponse>(value),
            ResponseSchema::PostBatch => check::<PostBatchResponse>(value),
            ResponseSchema::PostDetail => check::<PostDetailResponse>(value),
            ResponseSchema::CharacterAvatarPrompt => {
                check::<CharacterAvatarPromptResponse>(value)
            }
            ResponseSchema::PostImagePrompt => check::<PostImagePromptResponse>(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contains_key(value: &Value, key: &str) -> bool {
        match value {
            Value::Object(map) => {
                map.contains_key(key) || map.values().any(|v| contains_key(v, key))
            }
            Value::Array(items) => items.iter().any(|v| contains_key(v, key)),
            _ => false,
        }
    }

    #[test]
    fn names_round_trip() {
        for schema in ResponseSchema::ALL {
            assert_eq!(ResponseSchema::from_name(schema.name()), Some(schema));
        }
        assert_eq!(ResponseSchema::from_name("NotARealResponse"), None);
    }

    #[test]
    fn normalized_schemas_are_ref_free_and_strict() {
        for schema in ResponseSchema::ALL {
            let value = schema.normalized_schema();
            assert!(!contains_key(value, "$ref"), "{} has $ref", schema.name());
            assert!(
                !contains_key(value, "definitions") && !contains_key(value, "$defs"),
                "{} kept definitions",
                schema.name()
            );
            assert_eq!(
                value.get("additionalProperties"),
                Some(&Value::Bool(false)),
                "{} is not strict at the root",
                schema.name()
            );
            assert!(value.get("required").is_some(), "{} has no required list", schema.name());
        }
    }

    #[test]
    fn required_lists_every_declared_property() {
        let schema = ResponseSchema::PostDetail.normalized_schema();
        let properties: Vec<&String> = schema["properties"]
            .as_object()
            .expect("properties")
            .keys()
            .collect();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .expect("required")
            .iter()
            .filter_map(Value::as_str)
            .collect();
        for property in properties {
            assert!(required.contains(&property.as_str()), "{property} not required");
        }
    }

    #[test]
    fn structure_templates_mention_their_fields() {
        let template = ResponseSchema::CharacterBatch.structure_template();
        assert!(template.contains("characters"));
        assert!(template.contains("world_interpretation"));
        assert!(template.contains("posts_count"));

        let template = ResponseSchema::PostImagePrompt.structure_template();
        assert!(template.contains("prompt"));
    }

    #[test]
    fn validate_accepts_matching_value() {
        let value = serde_json::json!({"prompt": "a portrait"});
        assert!(ResponseSchema::PostImagePrompt.validate(&value).is_ok());
    }

    #[test]
    fn validate_rejects_wrong_shape() {
        let value = serde_json::json!({"not_prompt": 3});
        assert!(ResponseSchema::PostImagePrompt.validate(&value).is_err());
    }

    #[test]
    fn validate_accepts_character_batch_sample() {
        let value = serde_json::json!({
            "characters": [{
                "concept": "A retired fog-sailor who bottles nightmares.",
                "concept_short": "Nightmare bottler",
                "role_in_world": "artisan",
                "posts_count": 3,
                "personality_traits": ["wry", "patient"],
                "interests": ["tides", "glasswork"]
            }],
            "world_interpretation": "Dreams are a commodity.",
            "character_connections": [],
            "generated_characters_description": ""
        });
        assert!(ResponseSchema::CharacterBatch.validate(&value).is_ok());
    }
}
