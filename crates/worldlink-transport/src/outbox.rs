//! The application-facing send handle of a connection.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::ConnectionId;

/// One item queued for a connection loop.
#[derive(Debug, Clone)]
pub enum Outgoing {
    /// An encoded frame, appended to the outbound buffer as-is.
    Frame(Bytes),
    /// Stop the loop once everything queued before this has been written.
    Close,
}

/// Cloneable handle for queueing bytes on one connection.
///
/// Items are delivered in the order they were queued, across all clones.
/// Queueing never blocks; the connection loop drains the queue once per
/// tick. Sending to a loop that has already stopped is silently dropped.
#[derive(Debug, Clone)]
pub struct Outbox {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Outbox {
    pub(crate) fn new(id: ConnectionId, tx: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self { id, tx }
    }

    /// An outbox with no connection loop behind it. Everything queued shows
    /// up on the returned receiver instead.
    pub fn detached(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx), rx)
    }

    /// Which connection this outbox feeds.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues an encoded frame. Returns `false` if the loop is gone.
    pub fn send(&self, frame: Bytes) -> bool {
        self.tx.send(Outgoing::Frame(frame)).is_ok()
    }

    /// Asks the loop to stop after flushing what is already queued.
    pub fn close(&self) -> bool {
        self.tx.send(Outgoing::Close).is_ok()
    }

    /// `true` once the connection loop has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
