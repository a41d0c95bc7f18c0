//! The world model that Worldlink keeps synchronized.
//!
//! - [`World`]: entities with named components, levels, and a shared
//!   [`WorldRng`]. Implements the protocol's
//!   [`Resolver`](worldlink_protocol::Resolver), so decoded references
//!   resolve against it.
//! - [`Change`] / [`ChangeLog`]: incremental mutation records and the
//!   shared accumulator the server flushes as DELTA frames.
//! - [`LevelSave`] / [`EntityRecord`]: the full-snapshot records of the
//!   bootstrap.
//! - [`EventBus`]: named handlers for application events.
//! - [`EntityTemplate`]: JSON-configured initial components.

mod change;
mod error;
mod event;
mod log;
mod record;
mod rng;
mod template;
mod world;

pub use change::Change;
pub use error::WorldError;
pub use event::{Event, EventBus};
pub use log::ChangeLog;
pub use record::{EntityRecord, LevelSave};
pub use rng::WorldRng;
pub use template::{EntityTemplate, json_to_value};
pub use world::{Component, Entity, World};
