//! The in-memory world: entities, their components, levels, and the RNG.
//!
//! One type serves both sides of a connection:
//!
//! - The **server** world is created with [`World::with_change_log`]. Every
//!   mutation appends a [`Change`] to the shared log, and the periodic
//!   flush turns the log into one DELTA.
//! - A **client** mirror is created with [`World::new`]. It does not
//!   record; it is rebuilt from the bootstrap and kept current with
//!   [`World::apply`].

use std::collections::BTreeMap;

use worldlink_protocol::{EntityId, ResolveError, Resolver, Value};

use crate::{Change, ChangeLog, EntityRecord, LevelSave, WorldError, WorldRng};

/// A component value plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub value: Value,
    /// `true` if the value was last written by a remote peer.
    pub remote: bool,
}

/// One entity and its components.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: EntityId,
    level: Option<String>,
    components: BTreeMap<String, Component>,
}

impl Entity {
    fn new(id: EntityId, level: Option<String>) -> Self {
        Self {
            id,
            level,
            components: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// The level this entity lives in; `None` for world-level entities.
    pub fn level(&self) -> Option<&str> {
        self.level.as_deref()
    }

    pub fn get(&self, component: &str) -> Option<&Value> {
        self.components.get(component).map(|c| &c.value)
    }

    pub fn component(&self, component: &str) -> Option<&Component> {
        self.components.get(component)
    }

    pub fn has(&self, component: &str) -> bool {
        self.components.contains_key(component)
    }

    pub fn components(&self) -> impl Iterator<Item = (&str, &Component)> {
        self.components.iter().map(|(name, c)| (name.as_str(), c))
    }

    pub fn to_record(&self) -> EntityRecord {
        EntityRecord {
            id: self.id.clone(),
            level: self.level.clone(),
            components: self
                .components
                .iter()
                .map(|(name, c)| (name.clone(), c.value.clone()))
                .collect(),
        }
    }
}

/// The shared simulation state.
#[derive(Debug)]
pub struct World {
    entities: BTreeMap<EntityId, Entity>,
    levels: BTreeMap<String, Value>,
    current_level: Option<String>,
    rng: WorldRng,
    next_id: u64,
    log: Option<ChangeLog>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// An empty world that does not record changes.
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            levels: BTreeMap::new(),
            current_level: None,
            rng: WorldRng::from_entropy(),
            next_id: 0,
            log: None,
        }
    }

    /// An empty world that records every mutation into `log`.
    pub fn with_change_log(log: ChangeLog) -> Self {
        Self {
            log: Some(log),
            ..Self::new()
        }
    }

    pub fn change_log(&self) -> Option<&ChangeLog> {
        self.log.as_ref()
    }

    fn record(&self, change: Change) {
        if let Some(log) = &self.log {
            tracing::trace!(kind = change.kind(), "change recorded");
            log.push(change);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The value of one component.
    pub fn get(&self, id: &str, component: &str) -> Option<&Value> {
        self.entities.get(id)?.get(component)
    }

    /// The first entity (in id order) matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&Entity) -> bool) -> Option<&Entity> {
        self.entities.values().find(|e| predicate(e))
    }

    pub fn current_level(&self) -> Option<&str> {
        self.current_level.as_deref()
    }

    pub fn level(&self, id: &str) -> Option<&Value> {
        self.levels.get(id)
    }

    pub fn rng(&mut self) -> &mut WorldRng {
        &mut self.rng
    }

    pub fn rng_state(&self) -> [u32; 4] {
        self.rng.state()
    }

    // -----------------------------------------------------------------------
    // Mutations (recorded)
    // -----------------------------------------------------------------------

    fn fresh_id(&mut self) -> EntityId {
        loop {
            self.next_id += 1;
            let id = EntityId(format!("e{}", self.next_id));
            if !self.entities.contains_key(&id) {
                return id;
            }
        }
    }

    fn check_level(&self, level: Option<&str>) -> Result<(), WorldError> {
        match level {
            Some(level) if !self.levels.contains_key(level) => {
                Err(WorldError::UnknownLevel(level.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Creates an entity with a fresh id and the given components.
    ///
    /// # Errors
    /// Returns [`WorldError::UnknownLevel`] if `level` is not registered.
    pub fn spawn(
        &mut self,
        level: Option<String>,
        components: Vec<(String, Value)>,
    ) -> Result<EntityId, WorldError> {
        let id = self.fresh_id();
        self.create_entity(id.clone(), level)?;
        for (name, value) in components {
            self.set(&id, &name, value)?;
        }
        Ok(id)
    }

    /// Creates an empty entity under a caller-chosen id.
    ///
    /// # Errors
    /// Returns [`WorldError::DuplicateEntity`] if the id is taken, or
    /// [`WorldError::UnknownLevel`] if `level` is not registered.
    pub fn create_entity(&mut self, id: EntityId, level: Option<String>) -> Result<(), WorldError> {
        if self.entities.contains_key(&id) {
            return Err(WorldError::DuplicateEntity(id));
        }
        self.check_level(level.as_deref())?;
        self.entities
            .insert(id.clone(), Entity::new(id.clone(), level.clone()));
        self.record(Change::CreateEntity { entity: id, level });
        Ok(())
    }

    /// Removes an entity and returns it.
    ///
    /// # Errors
    /// Returns [`WorldError::UnknownEntity`] if there is no such entity.
    pub fn destroy(&mut self, id: &EntityId) -> Result<Entity, WorldError> {
        let entity = self
            .entities
            .remove(id)
            .ok_or_else(|| WorldError::UnknownEntity(id.clone()))?;
        self.record(Change::DestroyEntity(id.clone()));
        Ok(entity)
    }

    /// Writes a component, creating it if needed.
    ///
    /// # Errors
    /// Returns [`WorldError::UnknownEntity`] if there is no such entity.
    pub fn set(&mut self, id: &EntityId, component: &str, value: Value) -> Result<(), WorldError> {
        self.write_component(id, component, value, false)
    }

    fn write_component(
        &mut self,
        id: &EntityId,
        component: &str,
        value: Value,
        remote: bool,
    ) -> Result<(), WorldError> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| WorldError::UnknownEntity(id.clone()))?;

        let change = match entity.components.get_mut(component) {
            Some(existing) => {
                existing.value = value.clone();
                existing.remote = remote;
                Change::Set {
                    entity: id.clone(),
                    component: component.to_string(),
                    value,
                }
            }
            None => {
                entity.components.insert(
                    component.to_string(),
                    Component {
                        value: value.clone(),
                        remote,
                    },
                );
                Change::CreateComponent {
                    entity: id.clone(),
                    component: component.to_string(),
                    value,
                }
            }
        };
        self.record(change);
        Ok(())
    }

    /// Deletes a component and returns its last value.
    ///
    /// # Errors
    /// Returns [`WorldError::UnknownEntity`] or
    /// [`WorldError::UnknownComponent`].
    pub fn remove_component(&mut self, id: &EntityId, component: &str) -> Result<Value, WorldError> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| WorldError::UnknownEntity(id.clone()))?;
        let removed = entity
            .components
            .remove(component)
            .ok_or_else(|| WorldError::UnknownComponent {
                entity: id.clone(),
                component: component.to_string(),
            })?;
        self.record(Change::DeleteComponent {
            entity: id.clone(),
            component: component.to_string(),
        });
        Ok(removed.value)
    }

    /// Moves an entity to another level (`None` = outside any level).
    ///
    /// # Errors
    /// Returns [`WorldError::UnknownEntity`] or [`WorldError::UnknownLevel`].
    pub fn transfer(&mut self, id: &EntityId, level: Option<String>) -> Result<(), WorldError> {
        self.check_level(level.as_deref())?;
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| WorldError::UnknownEntity(id.clone()))?;
        entity.level.clone_from(&level);
        self.record(Change::TransferEntity {
            entity: id.clone(),
            level,
        });
        Ok(())
    }

    /// Registers (or replaces) a level from its save data.
    pub fn register_level(&mut self, level: impl Into<String>, save: Value) {
        let level = level.into();
        self.levels.insert(level.clone(), save.clone());
        self.record(Change::RegisterLevel { level, save });
    }

    /// # Errors
    /// Returns [`WorldError::UnknownLevel`] if `level` is not registered.
    pub fn change_level(&mut self, level: impl Into<String>) -> Result<(), WorldError> {
        let level = level.into();
        self.check_level(Some(&level))?;
        self.current_level = Some(level.clone());
        self.record(Change::ChangeLevel(level));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn level_saves(&self) -> Vec<LevelSave> {
        self.levels
            .iter()
            .map(|(id, save)| LevelSave::new(id.clone(), save.clone()))
            .collect()
    }

    pub fn entity_records(&self) -> Vec<EntityRecord> {
        self.entities.values().map(Entity::to_record).collect()
    }

    /// Replaces every level with `saves` and selects `current`.
    ///
    /// Not recorded: this is how a mirror takes in a bootstrap. A
    /// `current` level that is not among `saves` leaves no level selected.
    pub fn replace_levels(&mut self, current: Option<String>, saves: Vec<LevelSave>) {
        self.levels = saves.into_iter().map(|s| (s.id, s.save)).collect();
        self.current_level = current.filter(|c| self.levels.contains_key(c));
    }

    /// Replaces every entity with `records`. Not recorded.
    ///
    /// Components taken in this way are marked remote.
    pub fn replace_entities(&mut self, records: Vec<EntityRecord>) {
        self.entities = records
            .into_iter()
            .map(|record| {
                let mut entity = Entity::new(record.id.clone(), record.level);
                entity.components = record
                    .components
                    .into_iter()
                    .map(|(name, value)| {
                        (
                            name,
                            Component {
                                value,
                                remote: true,
                            },
                        )
                    })
                    .collect();
                (record.id, entity)
            })
            .collect();
    }

    /// Restores the RNG from state words. Not recorded.
    ///
    /// # Errors
    /// Returns [`WorldError::BadRecord`] for malformed state.
    pub fn set_rng_state(&mut self, words: &[u32]) -> Result<(), WorldError> {
        self.rng = WorldRng::from_state(words)?;
        Ok(())
    }

    /// Applies a change that was recorded elsewhere. Not recorded again.
    ///
    /// Component writes are lenient: `set` on a missing component creates
    /// it and `mkc` on an existing one overwrites it. Either way the
    /// component ends up marked remote.
    ///
    /// # Errors
    /// Returns [`WorldError::UnknownEntity`] when the change targets an
    /// entity this world doesn't have. Callers mirroring a server skip
    /// such changes.
    pub fn apply(&mut self, change: Change) -> Result<(), WorldError> {
        let log = self.log.take();
        let result = self.apply_unrecorded(change);
        self.log = log;
        result
    }

    fn apply_unrecorded(&mut self, change: Change) -> Result<(), WorldError> {
        match change {
            Change::Set {
                entity,
                component,
                value,
            }
            | Change::CreateComponent {
                entity,
                component,
                value,
            } => self.write_component(&entity, &component, value, true),
            Change::DeleteComponent { entity, component } => {
                self.remove_component(&entity, &component).map(drop)
            }
            Change::CreateEntity { entity, level } => {
                // Levels are not validated: a mirror can learn of an entity
                // before the level that holds it.
                if self.entities.contains_key(&entity) {
                    return Err(WorldError::DuplicateEntity(entity));
                }
                self.entities
                    .insert(entity.clone(), Entity::new(entity, level));
                Ok(())
            }
            Change::DestroyEntity(entity) => self.destroy(&entity).map(drop),
            Change::TransferEntity { entity, level } => {
                let target = self
                    .entities
                    .get_mut(&entity)
                    .ok_or(WorldError::UnknownEntity(entity))?;
                target.level = level;
                Ok(())
            }
            Change::ChangeLevel(level) => self.change_level(level),
            Change::RegisterLevel { level, save } => {
                self.levels.entry(level).or_insert(save);
                Ok(())
            }
        }
    }
}

impl Resolver for World {
    fn find_entity(&self, id: &str) -> Option<EntityId> {
        self.entities.get_key_value(id).map(|(id, _)| id.clone())
    }

    fn sync_component(
        &mut self,
        owner: &EntityId,
        name: &str,
        value: &Value,
    ) -> Result<(), ResolveError> {
        self.write_component(owner, name, value.clone(), true)
            .map_err(|_| ResolveError::UnknownEntity(owner.clone()))
    }
}
