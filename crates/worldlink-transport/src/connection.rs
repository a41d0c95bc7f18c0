//! The per-connection I/O loop.
//!
//! Each open socket is driven by one [`ConnectionLoop`], running as its own
//! Tokio task. Every tick it:
//!
//!   1. Tries a non-blocking read. Zero bytes means the peer closed.
//!   2. On data, appends to the inbound buffer and hands the buffer to the
//!      [`Inbound`] hook, which consumes every complete frame *before the
//!      next read happens*. Decoding is never spawned as a separate task,
//!      so frames are dispatched in exactly the order their bytes arrived.
//!   3. Drains the [`Outbox`] queue into the outbound buffer.
//!   4. Tries a non-blocking write, trimming exactly the accepted bytes.
//!   5. Sleeps for an interval chosen by [`Pacing`].
//!
//! "Would block" is the normal outcome of most reads and is not an error.
//! Socket faults end the loop with a [`CloseReason`]; they never escape as
//! errors into application code.

use std::fmt;
use std::io;

use bytes::{Buf, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::{ConnectionId, Outbox, Outgoing, Pacing};

/// Receives freshly-read bytes for one connection.
///
/// `receive` is called synchronously from the loop after every non-empty
/// read. It should consume complete frames from the front of `inbound`
/// (via [`Buf::advance`] or `split_to`) and leave any trailing partial
/// frame in place for the next call.
pub trait Inbound: Send {
    fn receive(&mut self, inbound: &mut BytesMut);

    /// Called once when the loop has stopped, before the socket closes.
    fn closed(&mut self, _reason: &CloseReason) {}
}

/// The two states of a connection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// Why a connection loop stopped.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer closed its end (a read returned zero bytes).
    PeerClosed,
    /// Local code asked for the close through [`Outbox::close`].
    Requested,
    /// The socket failed (reset, broken pipe, ...).
    Fault(io::Error),
}

impl CloseReason {
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::Requested => f.write_str("close requested"),
            Self::Fault(e) => write!(f, "socket fault: {e}"),
        }
    }
}

/// Outcome of step 1 of a tick.
enum ReadOutcome {
    Data(usize),
    WouldBlock,
    Closed,
    Fault(io::Error),
}

/// Cooperative, non-blocking read/write cycle over one TCP stream.
///
/// The inbound and outbound buffers are owned exclusively by the loop.
pub struct ConnectionLoop {
    id: ConnectionId,
    stream: TcpStream,
    inbound: BytesMut,
    outbound: BytesMut,
    queue: mpsc::UnboundedReceiver<Outgoing>,
    pacing: Pacing,
    state: LoopState,
    closing: bool,
}

impl ConnectionLoop {
    /// Wraps a connected stream. Returns the loop and its first [`Outbox`].
    pub fn new(id: ConnectionId, stream: TcpStream, pacing: Pacing) -> (Self, Outbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            id,
            stream,
            inbound: BytesMut::with_capacity(pacing.read_chunk),
            outbound: BytesMut::new(),
            queue: rx,
            pacing,
            state: LoopState::Running,
            closing: false,
        };
        (conn, Outbox::new(id, tx))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Runs ticks until the loop stops, then closes the socket.
    pub async fn run<I: Inbound>(mut self, mut handler: I) -> CloseReason {
        tracing::debug!(conn_id = %self.id, "connection loop started");

        let reason = loop {
            if let Some(reason) = self.tick(&mut handler).await {
                break reason;
            }
        };
        self.state = LoopState::Stopped;

        handler.closed(&reason);
        if !reason.is_fault() {
            let _ = self.stream.shutdown().await;
        }

        match &reason {
            CloseReason::Fault(e) => {
                tracing::debug!(conn_id = %self.id, error = %e, "connection loop stopped on fault");
            }
            other => {
                tracing::debug!(conn_id = %self.id, reason = %other, "connection loop stopped");
            }
        }
        reason
    }

    /// One iteration. Returns `Some` when the loop should stop.
    async fn tick<I: Inbound>(&mut self, handler: &mut I) -> Option<CloseReason> {
        debug_assert_eq!(self.state, LoopState::Running);

        // 1 + 2: read, then decode synchronously.
        let mut full_read = false;
        let mut would_block = false;
        match self.read() {
            ReadOutcome::Data(n) => {
                tracing::trace!(conn_id = %self.id, bytes = n, "read");
                full_read = n >= self.pacing.read_chunk;
                handler.receive(&mut self.inbound);
            }
            ReadOutcome::WouldBlock => would_block = true,
            ReadOutcome::Closed => return Some(CloseReason::PeerClosed),
            ReadOutcome::Fault(e) => return Some(CloseReason::Fault(e)),
        }

        // 3: flush queued writes into the outbound buffer.
        self.drain_queue();

        // 4: write whatever the socket will take.
        if !self.outbound.is_empty() {
            match self.stream.try_write(&self.outbound) {
                Ok(n) => {
                    tracing::trace!(conn_id = %self.id, bytes = n, "wrote");
                    self.outbound.advance(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Some(CloseReason::Fault(e)),
            }
        }

        if self.closing && self.outbound.is_empty() {
            return Some(CloseReason::Requested);
        }

        // 5: adaptive sleep.
        let pending = !self.inbound.is_empty() || !self.outbound.is_empty();
        let interval = self.pacing.next_interval(pending, full_read, would_block);
        tokio::time::sleep(interval).await;
        None
    }

    fn read(&mut self) -> ReadOutcome {
        self.inbound.reserve(self.pacing.read_chunk);
        match self.stream.try_read_buf(&mut self.inbound) {
            Ok(0) => ReadOutcome::Closed,
            Ok(n) => ReadOutcome::Data(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(e) => ReadOutcome::Fault(e),
        }
    }

    fn drain_queue(&mut self) {
        // Nothing queued after a Close is written.
        while !self.closing {
            match self.queue.try_recv() {
                Ok(Outgoing::Frame(frame)) => self.outbound.extend_from_slice(&frame),
                Ok(Outgoing::Close) => self.closing = true,
                Err(_) => break,
            }
        }
    }
}
