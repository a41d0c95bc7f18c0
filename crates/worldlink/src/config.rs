//! Server and client configuration.
//!
//! Both structs have sensible defaults and can be loaded from JSON. Every
//! field is optional in the JSON form; missing fields keep their default.
//!
//! ```rust
//! use worldlink::ServerConfig;
//!
//! let config = ServerConfig::from_json(r#"{ "bind": "0.0.0.0:9000" }"#).unwrap();
//! assert_eq!(config.bind, "0.0.0.0:9000");
//! assert_eq!(config.backlog, 5);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use worldlink_session::generate_broadcast_id;
use worldlink_transport::Pacing;
use worldlink_world::EntityTemplate;

use crate::WorldlinkError;

/// How often the server flushes accumulated changes as one DELTA.
pub const DEFAULT_FLUSH_RATE_HZ: u32 = 12;

/// How many client events may wait unread before new ones are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Configuration for a [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on. Port 0 picks a free port.
    pub bind: String,
    /// Accept backlog passed to `listen`.
    pub backlog: u32,
    /// How long the accept loop sleeps when no connection is waiting.
    pub accept_poll: Duration,
    /// DELTA flushes per second. 0 turns the flush clock off, leaving
    /// [`ServerHandle::flush`](crate::ServerHandle::flush) to the caller.
    pub flush_rate_hz: u32,
    /// Sleep intervals for every session's connection loop.
    pub pacing: Pacing,
    /// Initial components of a player entity created by JOIN, on top of
    /// `name` and `localplayer`.
    pub player_template: EntityTemplate,
    /// The local id the server puts on events it originates itself.
    pub local_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7777".to_string(),
            backlog: 5,
            accept_poll: Duration::from_millis(500),
            flush_rate_hz: DEFAULT_FLUSH_RATE_HZ,
            pacing: Pacing::default(),
            player_template: EntityTemplate::default(),
            local_id: "server".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.bind = addr.into();
        self
    }

    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn accept_poll(mut self, poll: Duration) -> Self {
        self.accept_poll = poll;
        self
    }

    pub fn flush_rate_hz(mut self, hz: u32) -> Self {
        self.flush_rate_hz = hz;
        self
    }

    /// Time between two flushes, or `None` when the clock is off.
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_rate_hz > 0).then(|| Duration::from_secs(1) / self.flush_rate_hz)
    }

    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn player_template(mut self, template: EntityTemplate) -> Self {
        self.player_template = template;
        self
    }

    /// # Errors
    /// Fails if `text` is not a JSON object of known fields.
    pub fn from_json(text: &str) -> Result<Self, WorldlinkError> {
        Ok(serde_json::from_str(text)?)
    }

    /// # Errors
    /// Fails if the file can't be read or doesn't parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorldlinkError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// The identifier this client joins with. Must be unique per server.
    pub local_id: String,
    /// Display name. Unique among joined players.
    pub name: String,
    pub pacing: Pacing,
    /// How many [`ClientEvent`](crate::ClientEvent)s may wait unread.
    /// Events past this are dropped with a warning.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut local_id = generate_broadcast_id();
        local_id.truncate(8);
        Self {
            local_id: format!("local-{local_id}"),
            name: "player".to_string(),
            pacing: Pacing::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn local_id(mut self, local_id: impl Into<String>) -> Self {
        self.local_id = local_id.into();
        self
    }

    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// # Errors
    /// Fails if `text` is not a JSON object of known fields.
    pub fn from_json(text: &str) -> Result<Self, WorldlinkError> {
        Ok(serde_json::from_str(text)?)
    }

    /// # Errors
    /// Fails if the file can't be read or doesn't parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorldlinkError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}
