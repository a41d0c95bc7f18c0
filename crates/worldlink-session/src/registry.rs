//! The session registry: every open connection on a server, and which of
//! them have joined the game.
//!
//! A session exists from the moment a connection is accepted until its
//! connection loop exits. Joining is a separate step on top of that:
//!
//! ```text
//! insert() ──→ join() ──→ leave() ──→ remove()
//!    │            │                      ▲
//!    │            └──────────────────────┤   (abrupt disconnect)
//!    └───────────────────────────────────┘   (never joined)
//! ```
//!
//! Display names are unique among *joined* sessions only. A name is free
//! again as soon as its session leaves or disconnects.
//!
//! # Concurrency note
//!
//! Like the world it sits next to, the registry is a plain struct. The
//! server wraps it in a mutex and never holds that lock across an `.await`.

use std::collections::HashMap;

use bytes::Bytes;
use worldlink_protocol::EntityId;
use worldlink_transport::{ConnectionId, Outbox};

use crate::SessionError;

/// Who a joined session plays as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerBinding {
    /// The entity that represents the player in the world.
    pub entity: EntityId,
    /// The client-chosen identifier sent with JOIN.
    pub local_id: String,
    /// The display name sent with JOIN.
    pub name: String,
}

/// One open connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: ConnectionId,
    /// Queues frames on this session's connection.
    pub outbox: Outbox,
    /// `Some` once the session has joined.
    pub player: Option<PlayerBinding>,
}

impl Session {
    pub fn is_joined(&self) -> bool {
        self.player.is_some()
    }
}

/// All sessions on one server, keyed by connection.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, Session>,
    /// Display name → the session using it. Kept in sync with the
    /// `player` field of each session.
    names: HashMap<String, ConnectionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted connection. Not joined yet.
    pub fn insert(&mut self, outbox: Outbox) {
        let id = outbox.id();
        tracing::debug!(%id, "session registered");
        self.sessions.insert(
            id,
            Session {
                id,
                outbox,
                player: None,
            },
        );
    }

    /// Forgets a connection, freeing its display name. Returns the binding
    /// it had, if it had joined.
    pub fn remove(&mut self, id: ConnectionId) -> Option<PlayerBinding> {
        let session = self.sessions.remove(&id)?;
        let binding = session.player?;
        self.names.remove(&binding.name);
        tracing::info!(%id, name = %binding.name, entity = %binding.entity, "session unbound");
        Some(binding)
    }

    /// Checks whether `id` may join as `name`, without changing anything.
    ///
    /// # Errors
    /// - [`SessionError::UnknownSession`]: no such connection
    /// - [`SessionError::AlreadyJoined`]: the session already has a player
    /// - [`SessionError::NameTaken`]: another joined session uses `name`
    pub fn check_join(&self, id: ConnectionId, name: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        if session.is_joined() {
            return Err(SessionError::AlreadyJoined);
        }
        if self.names.contains_key(name) {
            return Err(SessionError::NameTaken(name.to_string()));
        }
        Ok(())
    }

    /// Binds `id` to a player.
    ///
    /// # Errors
    /// The same as [`check_join`](Self::check_join).
    pub fn join(&mut self, id: ConnectionId, binding: PlayerBinding) -> Result<(), SessionError> {
        self.check_join(id, &binding.name)?;
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        tracing::info!(%id, name = %binding.name, entity = %binding.entity, "session joined");
        self.names.insert(binding.name.clone(), id);
        session.player = Some(binding);
        Ok(())
    }

    /// Unbinds `id` from its player, keeping the connection registered.
    ///
    /// # Errors
    /// - [`SessionError::UnknownSession`]: no such connection
    /// - [`SessionError::NotJoined`]: the session has no player
    pub fn leave(&mut self, id: ConnectionId) -> Result<PlayerBinding, SessionError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        let binding = session.player.take().ok_or(SessionError::NotJoined)?;
        self.names.remove(&binding.name);
        tracing::info!(%id, name = %binding.name, "session left");
        Ok(binding)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// The player `id` is bound to, if it has joined.
    pub fn binding(&self, id: ConnectionId) -> Option<&PlayerBinding> {
        self.sessions.get(&id)?.player.as_ref()
    }

    pub fn is_joined(&self, id: ConnectionId) -> bool {
        self.binding(id).is_some()
    }

    /// Every open session, joined or not.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Every joined session, in no particular order.
    pub fn joined(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values().filter(|s| s.is_joined())
    }

    /// Every joined session except `id`.
    pub fn others(&self, id: ConnectionId) -> impl Iterator<Item = &Session> {
        self.joined().filter(move |s| s.id != id)
    }

    /// Queues `frame` on every joined session. Returns how many accepted it.
    pub fn send_to_joined(&self, frame: &Bytes) -> usize {
        self.joined().filter(|s| s.outbox.send(frame.clone())).count()
    }

    /// Number of open connections, joined or not.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
