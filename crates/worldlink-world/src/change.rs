//! Change records: the unit a DELTA is made of.
//!
//! Every mutation of a recording [`World`](crate::World) produces one
//! [`Change`]. On the wire a change is a tuple whose first item is a short
//! kind string:
//!
//! | kind  | items                      |
//! |-------|----------------------------|
//! | `set` | entity, component, value   |
//! | `mkc` | entity, component, value   |
//! | `del` | entity, component          |
//! | `crt` | entity, level (`""` = none)|
//! | `dsp` | entity                     |
//! | `tsf` | entity, level (`""` = none)|
//! | `clv` | level                      |
//! | `nlv` | level, save                |
//!
//! Entity ids travel as plain strings. A single DELTA can create an entity
//! and then touch it, and the receiver decodes the whole frame before it
//! applies any of it, so the record's own target never depends on how
//! references resolve.

use worldlink_protocol::{EntityId, FromValue, IntoValue, Value};

use crate::WorldError;

/// One incremental world mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Overwrite an existing component.
    Set {
        entity: EntityId,
        component: String,
        value: Value,
    },
    /// Add a component that did not exist yet.
    CreateComponent {
        entity: EntityId,
        component: String,
        value: Value,
    },
    DeleteComponent {
        entity: EntityId,
        component: String,
    },
    /// Create an empty entity. Its components follow as `CreateComponent`.
    CreateEntity {
        entity: EntityId,
        level: Option<String>,
    },
    DestroyEntity(EntityId),
    TransferEntity {
        entity: EntityId,
        level: Option<String>,
    },
    ChangeLevel(String),
    RegisterLevel { level: String, save: Value },
}

impl Change {
    /// The wire kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            Change::Set { .. } => "set",
            Change::CreateComponent { .. } => "mkc",
            Change::DeleteComponent { .. } => "del",
            Change::CreateEntity { .. } => "crt",
            Change::DestroyEntity(_) => "dsp",
            Change::TransferEntity { .. } => "tsf",
            Change::ChangeLevel(_) => "clv",
            Change::RegisterLevel { .. } => "nlv",
        }
    }

    /// The entity this change touches, if any.
    pub fn entity(&self) -> Option<&EntityId> {
        match self {
            Change::Set { entity, .. }
            | Change::CreateComponent { entity, .. }
            | Change::DeleteComponent { entity, .. }
            | Change::CreateEntity { entity, .. }
            | Change::TransferEntity { entity, .. }
            | Change::DestroyEntity(entity) => Some(entity),
            Change::ChangeLevel(_) | Change::RegisterLevel { .. } => None,
        }
    }

    /// Parses a change record received in a DELTA.
    ///
    /// # Errors
    /// Returns [`WorldError::BadRecord`] for an unknown kind or missing
    /// items, and [`WorldError::Value`] when an item has the wrong type.
    pub fn from_record(record: Value) -> Result<Self, WorldError> {
        let items = match record {
            Value::Tuple(items) | Value::List(items) => items,
            other => {
                return Err(WorldError::BadRecord(format!(
                    "change record is a {}, expected tuple",
                    other.kind()
                )));
            }
        };
        let mut iter = items.into_iter();
        let kind = match iter.next() {
            Some(Value::String(kind)) => kind,
            _ => return Err(WorldError::BadRecord("change record has no kind".into())),
        };
        let mut items = Items {
            kind: kind.clone(),
            iter,
        };

        Ok(match kind.as_str() {
            "set" => Change::Set {
                entity: items.entity()?,
                component: items.next()?,
                value: items.next()?,
            },
            "mkc" => Change::CreateComponent {
                entity: items.entity()?,
                component: items.next()?,
                value: items.next()?,
            },
            "del" => Change::DeleteComponent {
                entity: items.entity()?,
                component: items.next()?,
            },
            "crt" => Change::CreateEntity {
                entity: items.entity()?,
                level: items.level()?,
            },
            "dsp" => Change::DestroyEntity(items.entity()?),
            "tsf" => Change::TransferEntity {
                entity: items.entity()?,
                level: items.level()?,
            },
            "clv" => Change::ChangeLevel(items.next()?),
            "nlv" => Change::RegisterLevel {
                level: items.next()?,
                save: items.next()?,
            },
            other => {
                return Err(WorldError::BadRecord(format!("unknown change kind {other:?}")));
            }
        })
    }
}

fn level_value(level: Option<String>) -> Value {
    Value::String(level.unwrap_or_default())
}

impl IntoValue for Change {
    fn into_value(self) -> Value {
        let kind = Value::String(self.kind().to_string());
        let items = match self {
            Change::Set {
                entity,
                component,
                value,
            }
            | Change::CreateComponent {
                entity,
                component,
                value,
            } => vec![kind, Value::String(entity.0), Value::String(component), value],
            Change::DeleteComponent { entity, component } => {
                vec![kind, Value::String(entity.0), Value::String(component)]
            }
            Change::CreateEntity { entity, level } | Change::TransferEntity { entity, level } => {
                vec![kind, Value::String(entity.0), level_value(level)]
            }
            Change::DestroyEntity(entity) => vec![kind, Value::String(entity.0)],
            Change::ChangeLevel(level) => vec![kind, Value::String(level)],
            Change::RegisterLevel { level, save } => vec![kind, Value::String(level), save],
        };
        Value::Tuple(items)
    }
}

/// Positional items of one change record.
struct Items {
    kind: String,
    iter: std::vec::IntoIter<Value>,
}

impl Items {
    fn next<T: FromValue>(&mut self) -> Result<T, WorldError> {
        let value = self.iter.next().ok_or_else(|| {
            WorldError::BadRecord(format!("{} record is missing items", self.kind))
        })?;
        Ok(T::from_value(value)?)
    }

    /// Entity ids are strings, but an entity reference is accepted too.
    fn entity(&mut self) -> Result<EntityId, WorldError> {
        match self.next::<Value>()? {
            Value::String(id) => Ok(EntityId(id)),
            Value::Entity(id) => Ok(id),
            other => Err(WorldError::BadRecord(format!(
                "{} record has a {} where an entity id belongs",
                self.kind,
                other.kind()
            ))),
        }
    }

    fn level(&mut self) -> Result<Option<String>, WorldError> {
        let level: String = self.next()?;
        Ok((!level.is_empty()).then_some(level))
    }
}
