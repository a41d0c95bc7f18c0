//! Transport layer for Worldlink.
//!
//! Moves bytes between a TCP socket and a pair of per-connection buffers.
//! It knows nothing about frames or commands:
//!
//! - [`TcpTransport`]: a listener with an explicit backlog, polled at a
//!   fixed interval for new connections.
//! - [`ConnectionLoop`]: the cooperative read → decode → flush → write →
//!   sleep cycle for one open socket, with adaptive [`Pacing`].
//! - [`Outbox`]: the cloneable handle application code uses to queue
//!   outbound frames (and to ask the loop to stop).
//! - [`Inbound`]: the hook the loop hands freshly-read bytes to.

mod connection;
mod error;
mod listener;
mod outbox;
mod pacing;

pub use connection::{CloseReason, ConnectionLoop, Inbound, LoopState};
pub use error::TransportError;
pub use listener::{TcpTransport, connect};
pub use outbox::{Outbox, Outgoing};
pub use pacing::Pacing;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
