//! # Worldlink
//!
//! Keeps a shared entity world in sync between one authoritative server
//! and any number of clients, over a compact binary protocol on plain TCP.
//!
//! The server owns the world. Every mutation made through
//! [`ServerHandle::world`] is recorded and goes out to joined clients as a
//! `DELTA` on the next flush tick (about 12 per second). Clients keep a
//! mirror of the world, and exchange events with each other by
//! broadcasting them through the server.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use worldlink::prelude::*;
//!
//! # async fn demo() -> Result<(), WorldlinkError> {
//! let server = Server::bind(ServerConfig::new().bind("127.0.0.1:7777")).await?;
//! let handle = server.spawn();
//!
//! let mut client = Client::connect("127.0.0.1:7777", ClientConfig::new("Alice")).await?;
//! while let Some(event) = client.next_event().await {
//!     if event == ClientEvent::Bootstrapped {
//!         break;
//!     }
//! }
//! println!("{} entities mirrored", client.world().len());
//!
//! client.stop()?;
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod handler;
mod server;
mod wire;

pub use client::{Client, ClientEvent};
pub use config::{ClientConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_FLUSH_RATE_HZ, ServerConfig};
pub use error::WorldlinkError;
pub use handler::{LOCAL_PLAYER_COMPONENT, NAME_COMPONENT};
pub use server::{Server, ServerHandle};

pub use worldlink_protocol as protocol;
pub use worldlink_session as session;
pub use worldlink_transport as transport;
pub use worldlink_world as world;

/// The types most applications need.
pub mod prelude {
    pub use crate::{
        Client, ClientConfig, ClientEvent, Server, ServerConfig, ServerHandle, WorldlinkError,
    };
    pub use worldlink_protocol::{EntityId, FromValue, IntoValue, Message, Value, values};
    pub use worldlink_session::{Ack, ErrorCategory, RemoteError, codes};
    pub use worldlink_transport::Pacing;
    pub use worldlink_world::{Change, EntityTemplate, Event, World};
}
