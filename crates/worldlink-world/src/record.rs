//! Snapshot records sent during the bootstrap (INIT_LEVELS / INIT_ENTITIES).
//!
//! Both records are string-keyed maps on the wire, so a receiver can skip
//! keys it doesn't know about.

use worldlink_protocol::{EntityId, FromValue, IntoValue, Value};

use crate::WorldError;

/// One registered level and its opaque save data.
///
/// Wire shape: `{"lid": String, "deltas": Value}`.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSave {
    pub id: String,
    pub save: Value,
}

impl LevelSave {
    pub fn new(id: impl Into<String>, save: Value) -> Self {
        Self {
            id: id.into(),
            save,
        }
    }

    /// Reads a level save back from its map form.
    ///
    /// # Errors
    /// Returns [`WorldError::BadRecord`] if the map lacks `lid` or `deltas`.
    pub fn from_value(value: Value) -> Result<Self, WorldError> {
        let mut fields = Fields::from_map(value, "level")?;
        Ok(Self {
            id: fields.required::<String>("lid")?,
            save: fields.required::<Value>("deltas")?,
        })
    }
}

impl IntoValue for LevelSave {
    fn into_value(self) -> Value {
        Value::map([("lid", Value::String(self.id)), ("deltas", self.save)])
    }
}

/// One entity with all of its components.
///
/// Wire shape: `{"eid": String, "level"?: String, "components": [(name, value)*]}`.
/// `level` is omitted for entities that live outside any level.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id: EntityId,
    pub level: Option<String>,
    pub components: Vec<(String, Value)>,
}

impl EntityRecord {
    /// # Errors
    /// Returns [`WorldError::BadRecord`] when `eid` or `components` is
    /// missing or a component entry is not a `(name, value)` pair.
    pub fn from_value(value: Value) -> Result<Self, WorldError> {
        let mut fields = Fields::from_map(value, "entity")?;
        let id = EntityId::new(fields.required::<String>("eid")?);
        let level = fields
            .optional::<String>("level")?
            .filter(|level| !level.is_empty());

        let entries = fields.required::<Vec<Value>>("components")?;
        let mut components = Vec::with_capacity(entries.len());
        for entry in entries {
            // Extra trailing items (older senders added a component kind)
            // are ignored.
            let mut items = match entry {
                Value::Tuple(items) | Value::List(items) => items.into_iter(),
                other => {
                    return Err(WorldError::BadRecord(format!(
                        "component entry of {id} is a {}, expected (name, value)",
                        other.kind()
                    )));
                }
            };
            let (Some(name), Some(value)) = (items.next(), items.next()) else {
                return Err(WorldError::BadRecord(format!(
                    "component entry of {id} has fewer than two items"
                )));
            };
            components.push((String::from_value(name)?, value));
        }

        Ok(Self {
            id,
            level,
            components,
        })
    }
}

impl IntoValue for EntityRecord {
    fn into_value(self) -> Value {
        let components = Value::List(
            self.components
                .into_iter()
                .map(|(name, value)| Value::Tuple(vec![Value::String(name), value]))
                .collect(),
        );

        let mut pairs = vec![("eid", Value::String(self.id.0))];
        if let Some(level) = self.level {
            pairs.push(("level", Value::String(level)));
        }
        pairs.push(("components", components));
        Value::map(pairs)
    }
}

/// The string-keyed fields of a record map, consumed one by one.
struct Fields {
    record: &'static str,
    pairs: Vec<(Value, Value)>,
}

impl Fields {
    fn from_map(value: Value, record: &'static str) -> Result<Self, WorldError> {
        match value {
            Value::Map(pairs) => Ok(Self { record, pairs }),
            other => Err(WorldError::BadRecord(format!(
                "{record} record is a {}, expected map",
                other.kind()
            ))),
        }
    }

    fn take(&mut self, key: &str) -> Option<Value> {
        let index = self.pairs.iter().position(|(k, _)| k.as_str() == Some(key))?;
        Some(self.pairs.swap_remove(index).1)
    }

    fn optional<T: FromValue>(&mut self, key: &str) -> Result<Option<T>, WorldError> {
        self.take(key).map(T::from_value).transpose().map_err(Into::into)
    }

    fn required<T: FromValue>(&mut self, key: &str) -> Result<T, WorldError> {
        self.optional(key)?.ok_or_else(|| {
            WorldError::BadRecord(format!("{} record missing {key:?}", self.record))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_record_without_level_omits_key() {
        let record = EntityRecord {
            id: EntityId::from("e1"),
            level: None,
            components: vec![("hp".into(), Value::Int32(3))],
        };
        let value = record.clone().into_value();
        assert!(value.get("level").is_none());
        assert_eq!(value.get("eid"), Some(&Value::String("e1".into())));
        assert_eq!(EntityRecord::from_value(value).unwrap(), record);
    }

    #[test]
    fn test_entity_record_ignores_extra_component_items() {
        let value = Value::map([
            ("eid", Value::String("e2".into())),
            ("level", Value::String("cave".into())),
            (
                "components",
                Value::List(vec![Value::Tuple(vec![
                    Value::String("hp".into()),
                    Value::Int32(1),
                    Value::String("Health".into()),
                ])]),
            ),
        ]);
        let record = EntityRecord::from_value(value).unwrap();
        assert_eq!(record.level.as_deref(), Some("cave"));
        assert_eq!(record.components, vec![("hp".to_string(), Value::Int32(1))]);
    }

    #[test]
    fn test_entity_record_missing_eid_is_bad_record() {
        let value = Value::map([("components", Value::List(vec![]))]);
        let err = EntityRecord::from_value(value).unwrap_err();
        assert!(matches!(err, WorldError::BadRecord(msg) if msg.contains("eid")));
    }

    #[test]
    fn test_level_save_from_non_map_is_bad_record() {
        let err = LevelSave::from_value(Value::Int32(1)).unwrap_err();
        assert!(matches!(err, WorldError::BadRecord(_)));
    }
}
