//! `Server` and the handle used to drive it from application code.
//!
//! This is the entry point for running a Worldlink server. It ties
//! together all the layers: transport → protocol → session → world.
//!
//! A running server is three kinds of task:
//!
//! - the **accept loop**, polling the listener every `accept_poll`;
//! - one **connection loop** per accepted socket, decoding frames and
//!   dispatching them to the command handlers in [`handler`](crate::handler);
//! - the **flush clock**, which every tick drains the shared
//!   [`ChangeLog`] and sends what it found to every joined session as one
//!   DELTA.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use worldlink_protocol::{IntoValue, Message, Value, commands, encode_message};
use worldlink_session::{DispatchTable, SessionRegistry};
use worldlink_transport::{ConnectionId, ConnectionLoop, TcpTransport};
use worldlink_world::{ChangeLog, EntityTemplate, Event, EventBus, World};

use crate::handler::{SessionCtx, SessionHandler, command_table};
use crate::wire::{event_message, unix_time};
use crate::{ServerConfig, WorldlinkError};

/// A DELTA carries at most this many records, the limit of its `u16`
/// value count. Larger batches go out as several DELTAs in order.
const MAX_DELTA_RECORDS: usize = u16::MAX as usize;

/// Shared server state passed to each connection handler.
///
/// Lock order is `sessions` before `world`. Neither lock is ever held
/// across an `.await`.
pub(crate) struct Shared {
    pub(crate) world: Mutex<World>,
    pub(crate) changes: ChangeLog,
    pub(crate) sessions: Mutex<SessionRegistry>,
    pub(crate) events: EventBus,
    pub(crate) template: EntityTemplate,
    pub(crate) local_id: String,
}

/// A bound, not yet running, Worldlink server.
///
/// # Example
///
/// ```rust,no_run
/// use worldlink::prelude::*;
///
/// # async fn demo() -> Result<(), WorldlinkError> {
/// let server = Server::bind(ServerConfig::new().bind("0.0.0.0:7777")).await?;
/// let handle = server.spawn();
///
/// handle.world().register_level("town", Value::Int32(0));
/// # Ok(())
/// # }
/// ```
pub struct Server {
    transport: TcpTransport,
    config: ServerConfig,
    handle: ServerHandle,
    table: Arc<DispatchTable<SessionCtx>>,
}

impl Server {
    /// Binds the listener. Nothing is accepted until [`run`](Self::run)
    /// or [`spawn`](Self::spawn).
    ///
    /// # Errors
    /// Returns [`WorldlinkError::Transport`] if the address can't be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self, WorldlinkError> {
        let transport = TcpTransport::bind(&config.bind, config.backlog).await?;
        let addr = transport.local_addr()?;

        let changes = ChangeLog::new();
        let shared = Arc::new(Shared {
            world: Mutex::new(World::with_change_log(changes.clone())),
            changes,
            sessions: Mutex::new(SessionRegistry::new()),
            events: EventBus::new(),
            template: config.player_template.clone(),
            local_id: config.local_id.clone(),
        });
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            transport,
            config,
            handle: ServerHandle {
                addr,
                shared,
                shutdown: Arc::new(shutdown),
            },
            table: Arc::new(command_table()),
        })
    }

    /// The address actually bound (useful after binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.handle.addr
    }

    /// A handle to the server's world and sessions.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Runs the accept loop and the flush clock until
    /// [`ServerHandle::shutdown`] is called, then asks every open session
    /// to close.
    pub async fn run(self) {
        let Self {
            transport,
            config,
            handle,
            table,
        } = self;
        let mut shutdown = handle.shutdown.subscribe();
        tracing::info!(addr = %handle.addr, "worldlink server running");

        tokio::select! {
            () = accept_loop(&transport, &config, &handle, &table) => {}
            () = flush_loop(config.flush_interval(), || handle.flush()) => {}
            () = shutdown_requested(&mut shutdown) => {}
        }

        let closing = {
            let sessions = handle.shared.sessions.lock();
            sessions.iter().filter(|s| s.outbox.close()).count()
        };
        tracing::info!(sessions = closing, "worldlink server stopped");
    }

    /// Runs the server on a new task and returns its handle.
    pub fn spawn(self) -> ServerHandle {
        let handle = self.handle();
        tokio::spawn(self.run());
        handle
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    // An error means every sender is gone, which counts as a shutdown.
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn accept_loop(
    transport: &TcpTransport,
    config: &ServerConfig,
    handle: &ServerHandle,
    table: &Arc<DispatchTable<SessionCtx>>,
) {
    loop {
        match transport.accept(config.accept_poll).await {
            Ok((id, stream, addr)) => open_session(id, stream, addr, config, handle, table),
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                tokio::time::sleep(config.accept_poll).await;
            }
        }
    }
}

/// Registers a new session and starts its connection loop.
fn open_session(
    id: ConnectionId,
    stream: TcpStream,
    addr: SocketAddr,
    config: &ServerConfig,
    handle: &ServerHandle,
    table: &Arc<DispatchTable<SessionCtx>>,
) {
    let (conn, outbox) = ConnectionLoop::new(id, stream, config.pacing.clone());
    handle.shared.sessions.lock().insert(outbox.clone());
    tracing::info!(conn_id = %id, %addr, "session opened");

    let ctx = SessionCtx {
        id,
        outbox,
        shared: Arc::clone(&handle.shared),
    };
    tokio::spawn(conn.run(SessionHandler::new(ctx, Arc::clone(table))));
}

/// Drains `changes` and sends them to every session `sessions` has
/// joined. Returns the number of records drained.
///
/// The caller holds the sessions lock, so a JOIN can't bootstrap from a
/// world whose changes are still waiting here.
pub(crate) fn flush_to(sessions: &SessionRegistry, changes: &ChangeLog) -> usize {
    let mut records: Vec<Value> = changes.drain().into_iter().map(IntoValue::into_value).collect();
    let count = records.len();

    while !records.is_empty() {
        let tail = records.split_off(records.len().min(MAX_DELTA_RECORDS));
        let batch = std::mem::replace(&mut records, tail);
        let batch_len = batch.len();
        match encode_message(&Message::new(commands::DELTA, batch)) {
            Ok(frame) => {
                let sent = sessions.send_to_joined(&frame);
                tracing::trace!(records = batch_len, sessions = sent, "delta flushed");
            }
            Err(e) => {
                tracing::warn!(error = %e, records = batch_len, "dropping undeliverable delta");
            }
        }
    }
    count
}

/// Calls `flush` every `period`. A late tick is skipped, not made up for.
/// With no period this never completes.
async fn flush_loop(period: Option<Duration>, flush: impl Fn() -> usize) {
    let Some(period) = period else {
        return std::future::pending().await;
    };
    let mut clock = tokio::time::interval(period);
    clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        clock.tick().await;
        let started = Instant::now();
        let records = flush();
        let spent = started.elapsed();
        if spent > period {
            tracing::warn!(?spent, ?period, records, "flush overran its tick");
        }
    }
}

/// Cloneable access to a server's state.
///
/// The accessors return lock guards. Drop them before the next `.await`,
/// and take `sessions()` before `world()` if you need both.
#[derive(Clone)]
pub struct ServerHandle {
    addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Locks the authoritative world. Every mutation made through the
    /// guard is recorded and reaches joined clients with the next flush.
    pub fn world(&self) -> MutexGuard<'_, World> {
        self.shared.world.lock()
    }

    /// The accumulator the flush clock drains.
    pub fn changes(&self) -> &ChangeLog {
        &self.shared.changes
    }

    /// Locks the session registry.
    pub fn sessions(&self) -> MutexGuard<'_, SessionRegistry> {
        self.shared.sessions.lock()
    }

    /// Handlers run for every BROADCAST a client sends and every event
    /// the server emits itself.
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Applies `event` to the server's world and sends it as EVENT to
    /// every joined session. An empty origin is filled in with the
    /// server's own local id.
    ///
    /// Returns how many sessions it was queued for.
    ///
    /// # Errors
    /// Returns [`WorldlinkError::Protocol`] if the event can't be encoded.
    pub fn emit(&self, mut event: Event) -> Result<usize, WorldlinkError> {
        if event.origin.is_empty() {
            event.origin.clone_from(&self.shared.local_id);
        }
        let frame = encode_message(&event_message(unix_time(), &event))?;

        self.shared.events.dispatch(&mut self.shared.world.lock(), &event);
        let sent = self.shared.sessions.lock().send_to_joined(&frame);
        tracing::debug!(event = %event.name, source = %event.source, sessions = sent, "event emitted");
        Ok(sent)
    }

    /// Sends everything accumulated since the last flush to every joined
    /// session, then leaves the accumulator empty. Returns how many
    /// change records went out.
    ///
    /// The flush clock calls this on every tick; calling it directly just
    /// flushes early.
    pub fn flush(&self) -> usize {
        let sessions = self.shared.sessions.lock();
        flush_to(&sessions, &self.shared.changes)
    }

    /// Stops the accept loop and the flush clock, and closes every session.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle").field("addr", &self.addr).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_flush_loop_flushes_once_per_period() {
        let calls = AtomicUsize::new(0);
        let flush = || calls.fetch_add(1, Ordering::SeqCst);

        let run = flush_loop(Some(Duration::from_millis(100)), flush);
        assert!(tokio::time::timeout(Duration::from_millis(350), run).await.is_err());

        // Ticks at 0, 100, 200 and 300 ms.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_loop_without_period_never_flushes() {
        let calls = AtomicUsize::new(0);
        let flush = || calls.fetch_add(1, Ordering::SeqCst);

        let run = flush_loop(None, flush);
        assert!(tokio::time::timeout(Duration::from_secs(3600), run).await.is_err());

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
