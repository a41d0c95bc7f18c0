//! JSON entity templates.
//!
//! A template is a JSON object mapping component names to initial values.
//! The server builds every new player entity from one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use worldlink_protocol::Value;

/// Converts a JSON value to the closest wire value.
///
/// Integers that fit `i32` become `Int32`, larger non-negative integers
/// that fit `u32` become `UInt32`, every other number becomes `Float64`.
/// Booleans become `Int32` 0/1. `null` has no wire form and yields `None`;
/// inside arrays and objects such entries are skipped.
pub fn json_to_value(json: &Json) -> Option<Value> {
    Some(match json {
        Json::Null => return None,
        Json::Bool(b) => Value::Int32(i32::from(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Value::Int32(i)
            } else if let Some(u) = n.as_u64().and_then(|u| u32::try_from(u).ok()) {
                Value::UInt32(u)
            } else {
                Value::Float64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::List(items.iter().filter_map(json_to_value).collect()),
        Json::Object(fields) => Value::Map(
            fields
                .iter()
                .filter_map(|(k, v)| Some((Value::String(k.clone()), json_to_value(v)?)))
                .collect(),
        ),
    })
}

/// Component name → initial value, as loaded from configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityTemplate {
    components: Map<String, Json>,
}

impl EntityTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one component.
    pub fn with(mut self, name: impl Into<String>, value: Json) -> Self {
        self.components.insert(name.into(), value);
        self
    }

    /// Parses a template from JSON text.
    ///
    /// # Errors
    /// Fails if the text is not a JSON object.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// The template's components as wire values, followed by `overrides`.
    ///
    /// An override replaces a template component of the same name in place.
    pub fn instantiate(&self, overrides: Vec<(String, Value)>) -> Vec<(String, Value)> {
        let mut components: Vec<(String, Value)> = self
            .components
            .iter()
            .filter_map(|(name, json)| Some((name.clone(), json_to_value(json)?)))
            .collect();

        for (name, value) in overrides {
            match components.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = value,
                None => components.push((name, value)),
            }
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_json_to_value_number_widths() {
        assert_eq!(json_to_value(&json!(-5)), Some(Value::Int32(-5)));
        assert_eq!(json_to_value(&json!(3_000_000_000_u64)), Some(Value::UInt32(3_000_000_000)));
        assert_eq!(json_to_value(&json!(1.5)), Some(Value::Float64(1.5)));
        assert_eq!(
            json_to_value(&json!(-3_000_000_000_i64)),
            Some(Value::Float64(-3_000_000_000.0))
        );
    }

    #[test]
    fn test_json_to_value_skips_nulls_in_containers() {
        let value = json_to_value(&json!({"a": null, "b": [true, null, "x"]})).unwrap();
        assert_eq!(
            value,
            Value::Map(vec![(
                Value::String("b".into()),
                Value::List(vec![Value::Int32(1), Value::String("x".into())]),
            )])
        );
    }

    #[test]
    fn test_instantiate_override_replaces_in_place() {
        let template = EntityTemplate::from_json(r#"{"hp": 10, "name": "nobody"}"#).unwrap();
        let components = template.instantiate(vec![
            ("name".into(), Value::String("Alice".into())),
            ("localplayer".into(), Value::String("local-1".into())),
        ]);
        assert_eq!(
            components,
            vec![
                ("hp".to_string(), Value::Int32(10)),
                ("name".to_string(), Value::String("Alice".into())),
                ("localplayer".to_string(), Value::String("local-1".into())),
            ]
        );
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(EntityTemplate::from_json("[1, 2]").is_err());
    }
}
