//! JSON-schema normalization for strict structured output.
//!
//! The downstream chat-completions API requires a flat, strict schema:
//! no `$ref`/definitions, no single-element `allOf` wrappers, and every
//! object closed (`additionalProperties: false`) with all of its declared
//! properties required. `normalize` rewrites a schema generated by
//! `schemars` into that form.

use serde_json::{Map, Value};

/// Normalize a generated schema in place and return it.
pub fn normalize(mut schema: Value) -> Value {
    let defs = collect_definitions(&schema);
    inline_refs(&mut schema, &defs);
    collapse_allof(&mut schema);
    if let Value::Object(map) = &mut schema {
        map.remove("definitions");
        map.remove("$defs");
        map.insert("additionalProperties".to_string(), Value::Bool(false));
    }
    strict_objects(&mut schema);
    schema
}

/// Definitions may live under `definitions` (draft 7) or `$defs` (2019+).
fn collect_definitions(schema: &Value) -> Map<String, Value> {
    let mut defs = Map::new();
    for key in ["definitions", "$defs"] {
        if let Some(Value::Object(map)) = schema.get(key) {
            for (name, value) in map {
                defs.insert(name.clone(), value.clone());
            }
        }
    }
    defs
}

fn inline_refs(value: &mut Value, defs: &Map<String, Value>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                let name = reference.rsplit('/').next().unwrap_or_default();
                if let Some(definition) = defs.get(name) {
                    *value = definition.clone();
                    inline_refs(value, defs);
                    return;
                }
            }
            for nested in map.values_mut() {
                inline_refs(nested, defs);
            }
        }
        Value::Array(items) => {
            for item in items {
                inline_refs(item, defs);
            }
        }
        _ => {}
    }
}

fn collapse_allof(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let single = match map.get("allOf") {
                Some(Value::Array(items)) if items.len() == 1 => Some(items[0].clone()),
                _ => None,
            };
            if let Some(inner) = single {
                *value = inner;
                collapse_allof(value);
                return;
            }
            for nested in map.values_mut() {
                collapse_allof(nested);
            }
        }
        Value::Array(items) => {
            for item in items {
                collapse_allof(item);
            }
        }
        _ => {}
    }
}

/// Close every object node and require all of its declared properties.
fn strict_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let is_object = map.get("type").and_then(Value::as_str) == Some("object");
            let property_names: Vec<Value> = map
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| props.keys().cloned().map(Value::String).collect())
                .unwrap_or_default();
            if is_object && !property_names.is_empty() {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
                map.insert("required".to_string(), Value::Array(property_names));
            }
            for nested in map.values_mut() {
                strict_objects(nested);
            }
        }
        Value::Array(items) => {
            for item in items {
                strict_objects(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

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
    fn inlines_refs_and_drops_definitions() {
        let schema = json!({
            "type": "object",
            "properties": {
                "pet": {"$ref": "#/definitions/Pet"}
            },
            "definitions": {
                "Pet": {
                    "type": "object",
                    "properties": {"name": {"type": "string"}}
                }
            }
        });
        let normalized = normalize(schema);
        assert!(!contains_key(&normalized, "$ref"));
        assert!(!contains_key(&normalized, "definitions"));
        assert_eq!(normalized["properties"]["pet"]["type"], "object");
        assert_eq!(
            normalized["properties"]["pet"]["properties"]["name"]["type"],
            "string"
        );
    }

    #[test]
    fn resolves_refs_nested_inside_definitions() {
        let schema = json!({
            "type": "object",
            "properties": {
                "outer": {"$ref": "#/$defs/Outer"}
            },
            "$defs": {
                "Outer": {
                    "type": "object",
                    "properties": {"inner": {"$ref": "#/$defs/Inner"}}
                },
                "Inner": {
                    "type": "object",
                    "properties": {"leaf": {"type": "integer"}}
                }
            }
        });
        let normalized = normalize(schema);
        assert!(!contains_key(&normalized, "$ref"));
        assert_eq!(
            normalized["properties"]["outer"]["properties"]["inner"]["properties"]["leaf"]
                ["type"],
            "integer"
        );
    }

    #[test]
    fn collapses_single_element_allof() {
        let schema = json!({
            "type": "object",
            "properties": {
                "nested": {
                    "description": "dropped by the collapse, as the API requires",
                    "allOf": [{"$ref": "#/definitions/Inner"}]
                }
            },
            "definitions": {
                "Inner": {
                    "type": "object",
                    "properties": {"field": {"type": "string"}}
                }
            }
        });
        let normalized = normalize(schema);
        assert!(!contains_key(&normalized, "allOf"));
        assert_eq!(normalized["properties"]["nested"]["type"], "object");
    }

    #[test]
    fn multi_element_allof_is_left_alone() {
        let schema = json!({
            "type": "object",
            "properties": {},
            "allOf": [{"type": "object"}, {"minProperties": 1}]
        });
        let normalized = normalize(schema);
        assert_eq!(normalized["allOf"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn every_object_becomes_strict_with_full_required() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": {"type": "string"},
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "x": {"type": "integer"},
                            "y": {"type": "integer"}
                        }
                    }
                }
            }
        });
        let normalized = normalize(schema);
        assert_eq!(normalized["additionalProperties"], false);
        let root_required: Vec<&str> = normalized["required"]
            .as_array()
            .expect("required")
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(root_required.contains(&"a") && root_required.contains(&"items"));

        let item = &normalized["properties"]["items"]["items"];
        assert_eq!(item["additionalProperties"], false);
        let item_required: Vec<&str> = item["required"]
            .as_array()
            .expect("required")
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(item_required.len(), 2);
    }

    #[test]
    fn root_is_closed_even_without_properties() {
        let normalized = normalize(json!({"type": "object"}));
        assert_eq!(normalized["additionalProperties"], false);
    }
}
