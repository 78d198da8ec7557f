//! Renders the response-structure description embedded in prompts.
//!
//! The model sees the expected shape twice: as a strict JSON schema in
//! `response_format`, and as this human-readable field list inside the
//! prompt text. The renderer walks an already-normalized schema (no refs),
//! emitting one `name: description` line per property, with array-of-object
//! items bulleted and nested objects indented.

use serde_json::Value;

/// Render the field list of a normalized object schema.
pub fn render_structure(schema: &Value) -> String {
    let mut out = String::new();
    render_properties(schema, 0, &mut out);
    out.trim_end().to_string()
}

fn render_properties(schema: &Value, indent: usize, out: &mut String) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };

    for (name, property) in properties {
        let pad = "  ".repeat(indent);
        let description = property
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("");
        let line = format!("{pad}{name}: {description}");
        out.push_str(line.trim_end());
        out.push('\n');

        let array_items = property
            .get("items")
            .filter(|items| items.get("properties").is_some());
        if let Some(items) = array_items {
            let mut nested = String::new();
            render_properties(items, indent + 2, &mut nested);
            let mut lines = nested.lines();
            if let Some(first) = lines.next() {
                out.push_str(&"  ".repeat(indent + 1));
                out.push_str("- ");
                out.push_str(first.trim_start());
                out.push('\n');
            }
            for line in lines {
                out.push_str(line);
                out.push('\n');
            }
        } else if property.get("properties").is_some() {
            render_properties(property, indent + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_flat_fields_with_descriptions() {
        let schema = json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string", "description": "The optimized prompt"}
            }
        });
        assert_eq!(render_structure(&schema), "prompt: The optimized prompt");
    }

    #[test]
    fn renders_nested_objects_indented() {
        let schema = json!({
            "type": "object",
            "properties": {
                "details": {
                    "type": "object",
                    "description": "Extra details",
                    "properties": {
                        "climate": {"type": "string", "description": "Climate"}
                    }
                }
            }
        });
        let rendered = render_structure(&schema);
        assert!(rendered.contains("details: Extra details"));
        assert!(rendered.contains("\n  climate: Climate"));
    }

    #[test]
    fn renders_array_items_as_bullets() {
        let schema = json!({
            "type": "object",
            "properties": {
                "characters": {
                    "type": "array",
                    "description": "The generated characters",
                    "items": {
                        "type": "object",
                        "properties": {
                            "concept": {"type": "string", "description": "Character concept"},
                            "role": {"type": "string", "description": "Role in the world"}
                        }
                    }
                }
            }
        });
        let rendered = render_structure(&schema);
        assert!(rendered.contains("characters: The generated characters"));
        assert!(rendered.contains("\n  - concept: Character concept"));
        assert!(rendered.contains("\n    role: Role in the world"));
    }

    #[test]
    fn missing_description_renders_bare_name() {
        let schema = json!({
            "type": "object",
            "properties": {"tag": {"type": "string"}}
        });
        assert_eq!(render_structure(&schema), "tag:");
    }
}
