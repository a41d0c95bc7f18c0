//! The resolution context used while decoding.
//!
//! Some wire values are references: an entity id only means something if
//! the receiving world knows that entity, and a component reference is
//! applied to its owner as it is decoded. The protocol layer doesn't own a
//! world, so it asks through the [`Resolver`] trait instead.

use crate::{EntityId, Value};

/// Why the resolution context refused a reference.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    /// No live entity has this id.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// The context has no window singleton to hand out.
    #[error("no global window available")]
    NoGlobalWindow,

    /// The context rejected the component for its own reasons.
    #[error("component {name} on {owner} rejected: {reason}")]
    ComponentRejected {
        owner: EntityId,
        name: String,
        reason: String,
    },
}

/// Turns wire-level references into live objects.
///
/// Implemented by the world model. The protocol crate only needs these
/// three capabilities, so the world can change freely behind them.
pub trait Resolver {
    /// Looks up a live entity by its textual id.
    ///
    /// Returns the canonical id when the entity exists.
    fn find_entity(&self, id: &str) -> Option<EntityId>;

    /// Applies a decoded component reference to its owner.
    ///
    /// Updates an existing same-named component, or creates one and marks
    /// it as remotely originated.
    ///
    /// # Errors
    /// Returns [`ResolveError`] if the owner is gone or the world refuses
    /// the component.
    fn sync_component(
        &mut self,
        owner: &EntityId,
        name: &str,
        value: &Value,
    ) -> Result<(), ResolveError>;

    /// Whether a process-wide window singleton exists. Default: yes.
    fn has_global_window(&self) -> bool {
        true
    }
}

/// A resolver that accepts every reference without touching anything.
///
/// Useful for inspecting frames outside a world (tests, logging tools).
#[derive(Debug, Clone, Copy, Default)]
pub struct Unresolved;

impl Resolver for Unresolved {
    fn find_entity(&self, id: &str) -> Option<EntityId> {
        Some(EntityId::from(id))
    }

    fn sync_component(
        &mut self,
        _owner: &EntityId,
        _name: &str,
        _value: &Value,
    ) -> Result<(), ResolveError> {
        Ok(())
    }
}

/// What a [`Staged`] resolver does with an entity id its world doesn't
/// have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DanglingRefs {
    /// Fail resolution with [`ResolveError::UnknownEntity`].
    Reject,
    /// Keep the reference as a bare id. A mirror uses this, since a value
    /// may name an entity that arrives later in the same batch.
    Keep,
}

/// A component write collected while decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentWrite {
    pub owner: EntityId,
    pub name: String,
    pub value: Value,
}

/// Resolves against a borrowed world without changing it.
///
/// Component references are collected instead of applied, so a frame that
/// fails halfway leaves nothing behind. Once the whole frame has resolved,
/// hand [`Staged::into_writes`] to [`Resolver::sync_component`] on the
/// real world.
#[derive(Debug)]
pub struct Staged<'w, R: ?Sized> {
    world: &'w R,
    dangling: DanglingRefs,
    writes: Vec<ComponentWrite>,
}

impl<'w, R: Resolver + ?Sized> Staged<'w, R> {
    pub fn new(world: &'w R, dangling: DanglingRefs) -> Self {
        Self {
            world,
            dangling,
            writes: Vec::new(),
        }
    }

    /// The collected writes, in decode order.
    pub fn into_writes(self) -> Vec<ComponentWrite> {
        self.writes
    }
}

impl<R: Resolver + ?Sized> Resolver for Staged<'_, R> {
    fn find_entity(&self, id: &str) -> Option<EntityId> {
        match (self.world.find_entity(id), self.dangling) {
            (Some(found), _) => Some(found),
            (None, DanglingRefs::Keep) => Some(EntityId::from(id)),
            (None, DanglingRefs::Reject) => None,
        }
    }

    fn sync_component(
        &mut self,
        owner: &EntityId,
        name: &str,
        value: &Value,
    ) -> Result<(), ResolveError> {
        if self.world.find_entity(owner.as_str()).is_none() {
            return Err(ResolveError::UnknownEntity(owner.clone()));
        }
        self.writes.push(ComponentWrite {
            owner: owner.clone(),
            name: name.to_string(),
            value: value.clone(),
        });
        Ok(())
    }

    fn has_global_window(&self) -> bool {
        self.world.has_global_window()
    }
}
