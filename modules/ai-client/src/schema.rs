//! JSON-schema generation for structured output.
//!
//! Both providers accept a JSON schema describing the reply. OpenAI's strict
//! mode is the pickier of the two, so schemas are always emitted in that shape:
//! every object closed (`additionalProperties: false`), every property listed
//! in `required`, and no `$ref` indirection.

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// A type a provider can be asked to produce directly.
///
/// Blanket-implemented for anything that is `JsonSchema + DeserializeOwned`.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn strict_schema() -> Value {
        let mut root = serde_json::to_value(schema_for!(Self)).unwrap_or_default();

        let definitions = match root.as_object_mut() {
            Some(map) => {
                map.remove("$schema");
                map.remove("definitions").unwrap_or(Value::Null)
            }
            None => Value::Null,
        };

        resolve(&mut root, &definitions);
        root
    }

    /// Name shown to the provider for this output.
    fn output_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

/// Inline `$ref`s, collapse single-element `allOf`, and close every object.
fn resolve(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(target) = referenced(map, definitions) {
                *value = target;
                resolve(value, definitions);
                return;
            }

            if let Some(Value::Array(all_of)) = map.get("allOf") {
                if all_of.len() == 1 {
                    *value = all_of[0].clone();
                    resolve(value, definitions);
                    return;
                }
            }

            if map.get("type").and_then(Value::as_str) == Some("object") {
                close_object(map);
            }

            for child in map.values_mut() {
                resolve(child, definitions);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                resolve(item, definitions);
            }
        }
        _ => {}
    }
}

fn referenced(map: &Map<String, Value>, definitions: &Value) -> Option<Value> {
    let path = map.get("$ref")?.as_str()?;
    let name = path.strip_prefix("#/definitions/")?;
    definitions.get(name).cloned()
}

fn close_object(map: &mut Map<String, Value>) {
    map.insert("additionalProperties".into(), Value::Bool(false));
    let keys: Vec<Value> = map
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().map(Value::String).collect())
        .unwrap_or_default();
    map.insert("required".into(), Value::Array(keys));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Scores {
        demand: i32,
        effort: Option<i32>,
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Verdict {
        label: String,
        notes: Option<String>,
        scores: Scores,
    }

    #[test]
    fn output_name_follows_the_type() {
        assert_eq!(Verdict::output_name(), "Verdict");
    }

    #[test]
    fn optional_fields_are_still_required() {
        let schema = Verdict::strict_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(required.contains(&"label"));
        assert!(required.contains(&"notes"));
        assert!(required.contains(&"scores"));
    }

    #[test]
    fn nested_definitions_are_inlined_and_closed() {
        let schema = Verdict::strict_schema();
        assert!(schema.get("definitions").is_none());
        assert!(schema.get("$schema").is_none());

        let scores = &schema["properties"]["scores"];
        assert!(scores.get("$ref").is_none());
        assert_eq!(scores["type"], "object");
        assert_eq!(scores["additionalProperties"], false);
    }
}
