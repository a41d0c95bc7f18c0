//! Error types for the world model.

use worldlink_protocol::{EntityId, ValueTypeError};

/// Errors that can occur while mutating the world or reading records.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorldError {
    /// No live entity has this id.
    #[error("entity {0} not found")]
    UnknownEntity(EntityId),

    /// An entity with this id already exists.
    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),

    /// The entity exists but has no component with this name.
    #[error("component {component} not found on {entity}")]
    UnknownComponent { entity: EntityId, component: String },

    /// No level is registered under this id.
    #[error("level {0} not found")]
    UnknownLevel(String),

    /// A level, entity, or change record had the wrong shape.
    #[error("malformed record: {0}")]
    BadRecord(String),

    /// A record field had the wrong value type.
    #[error(transparent)]
    Value(#[from] ValueTypeError),
}
