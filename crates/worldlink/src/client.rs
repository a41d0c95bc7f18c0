//! The client side: one connection to a server and a local mirror of its
//! world.
//!
//! A [`Client`] joins as soon as it connects. From then on its connection
//! loop keeps the mirror in step:
//!
//! - `INIT_LEVELS`, `INIT_ENTITIES`, `RNG` replace the whole mirror
//! - `DELTA` applies incremental change records
//! - `EVENT` runs the matching [`EventBus`] handlers against the mirror
//! - `GOT_BROADCAST` settles an outstanding [`emit`](Client::emit)
//! - `ERR` is reported as [`ClientEvent::Error`], and drops the pending
//!   broadcast it names, if any
//!
//! Entity references the mirror doesn't have yet decode as bare ids
//! instead of failing the frame.
//!
//! Everything noteworthy is also reported on the client's event channel,
//! see [`Client::next_event`].

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use worldlink_protocol::{DanglingRefs, Message, Value, commands, encode_message, values};
use worldlink_session::{
    Ack, AckCallback, Args, BroadcastLedger, CommandError, DispatchTable, ErrorCategory,
    RemoteError,
};
use worldlink_transport::{
    CloseReason, ConnectionId, ConnectionLoop, Inbound, Outbox, connect,
};
use worldlink_world::{Change, EntityRecord, Event, EventBus, LevelSave, World};

use crate::wire::{self, Frame, take_frame};
use crate::{ClientConfig, WorldlinkError};

/// Something that happened on a client's connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A full bootstrap replaced the mirror.
    Bootstrapped,
    /// A DELTA was applied. Records naming entities the mirror doesn't
    /// have are skipped.
    Delta { applied: usize, skipped: usize },
    /// Another peer's event, already applied to the mirror.
    Event { time: f64, event: Event },
    /// The server refused a request.
    Error(RemoteError),
    /// The connection loop stopped.
    Closed,
}

/// State the connection task and the [`Client`] handle share.
struct ClientShared {
    world: Mutex<World>,
    ledger: Mutex<BroadcastLedger>,
    events: EventBus,
}

/// What a client command handler gets to work with.
struct ClientCtx {
    shared: Arc<ClientShared>,
    events_tx: mpsc::Sender<ClientEvent>,
}

impl ClientCtx {
    /// Queues `event` for [`Client::next_event`]. The queue is bounded by
    /// [`ClientConfig::event_capacity`]; when the application falls that
    /// far behind, new events are dropped.
    fn notify(&self, event: ClientEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(?event, "client event queue full, dropping event");
            }
            // Nobody listening is fine.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// A connection to a Worldlink server.
///
/// Dropping the client closes the connection without sending LEAVE, so
/// the server keeps the player's entity for a later JOIN. Call
/// [`stop`](Self::stop) to leave properly.
pub struct Client {
    id: ConnectionId,
    config: ClientConfig,
    outbox: Outbox,
    shared: Arc<ClientShared>,
    notifications: mpsc::Receiver<ClientEvent>,
    task: JoinHandle<CloseReason>,
}

impl Client {
    /// Connects to `addr` and sends `JOIN(local_id, name)`.
    ///
    /// Returns as soon as the connection is up; the bootstrap arrives
    /// asynchronously as [`ClientEvent::Bootstrapped`].
    ///
    /// # Errors
    /// Returns [`WorldlinkError::Transport`] if the server can't be reached.
    pub async fn connect(addr: &str, config: ClientConfig) -> Result<Self, WorldlinkError> {
        let stream = connect(addr).await?;
        let id = ConnectionId::next();
        let (conn, outbox) = ConnectionLoop::new(id, stream, config.pacing.clone());

        let shared = Arc::new(ClientShared {
            world: Mutex::new(World::new()),
            ledger: Mutex::new(BroadcastLedger::new()),
            events: EventBus::new(),
        });
        let (events_tx, notifications) = mpsc::channel(config.event_capacity.max(1));

        let join = Message::new(
            commands::JOIN,
            values![config.local_id.as_str(), config.name.as_str()],
        );
        outbox.send(encode_message(&join)?);

        let handler = ClientHandler {
            ctx: ClientCtx {
                shared: Arc::clone(&shared),
                events_tx,
            },
            table: command_table(),
            outbox: outbox.clone(),
            broken: false,
        };
        let task = tokio::spawn(conn.run(handler));
        tracing::info!(conn_id = %id, addr, name = %config.name, local_id = %config.local_id, "client connected");

        Ok(Self {
            id,
            config,
            outbox,
            shared,
            notifications,
            task,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn local_id(&self) -> &str {
        &self.config.local_id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Locks the local mirror of the server's world.
    ///
    /// The connection task needs this lock to apply every incoming frame,
    /// so don't hold the guard across an `.await`.
    pub fn world(&self) -> MutexGuard<'_, World> {
        self.shared.world.lock()
    }

    /// Handlers run for every EVENT from the server and every event this
    /// client emits.
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// The smoothed broadcast round-trip time, `None` before the first
    /// acknowledgement.
    pub fn latency(&self) -> Option<Duration> {
        self.shared.ledger.lock().latency()
    }

    /// Broadcasts still waiting for `GOT_BROADCAST`.
    pub fn pending_broadcasts(&self) -> usize {
        self.shared.ledger.lock().pending()
    }

    /// Applies `event` to the mirror and broadcasts it through the server.
    /// Returns the broadcast id.
    ///
    /// # Errors
    /// [`WorldlinkError::Closed`] once the connection has stopped.
    pub fn emit(&self, event: Event) -> Result<String, WorldlinkError> {
        self.broadcast(event, None)
    }

    /// Like [`emit`](Self::emit), running `on_ack` when the server
    /// acknowledges the broadcast. `on_ack` runs on the connection task.
    ///
    /// # Errors
    /// [`WorldlinkError::Closed`] once the connection has stopped.
    pub fn emit_with<F>(&self, event: Event, on_ack: F) -> Result<String, WorldlinkError>
    where
        F: FnOnce(&Ack) + Send + 'static,
    {
        self.broadcast(event, Some(Box::new(on_ack)))
    }

    fn broadcast(&self, mut event: Event, on_ack: Option<AckCallback>) -> Result<String, WorldlinkError> {
        if self.outbox.is_closed() {
            return Err(WorldlinkError::Closed);
        }
        event.origin.clone_from(&self.config.local_id);

        let id = self.shared.ledger.lock().register(on_ack);
        let frame = match encode_message(&wire::broadcast_message(&id, &event)) {
            Ok(frame) => frame,
            Err(e) => {
                self.shared.ledger.lock().forget(&id);
                return Err(e.into());
            }
        };

        self.shared
            .events
            .dispatch(&mut self.shared.world.lock(), &event);
        if !self.outbox.send(frame) {
            self.shared.ledger.lock().forget(&id);
            return Err(WorldlinkError::Closed);
        }
        tracing::debug!(conn_id = %self.id, broadcast_id = %id, event = %event.name, "broadcast sent");
        Ok(id)
    }

    /// Asks the server for a fresh bootstrap.
    ///
    /// # Errors
    /// [`WorldlinkError::Closed`] once the connection has stopped.
    pub fn snapshot(&self) -> Result<(), WorldlinkError> {
        self.send(&Message::bare(commands::SNAPSHOT))
    }

    /// Sends LEAVE and stops the connection once it has been written.
    ///
    /// # Errors
    /// [`WorldlinkError::Closed`] if the connection had already stopped.
    pub fn stop(&self) -> Result<(), WorldlinkError> {
        self.send(&Message::bare(commands::LEAVE))?;
        self.outbox.close();
        tracing::info!(conn_id = %self.id, "client leaving");
        Ok(())
    }

    fn send(&self, message: &Message) -> Result<(), WorldlinkError> {
        let frame = encode_message(message)?;
        if self.outbox.send(frame) {
            Ok(())
        } else {
            Err(WorldlinkError::Closed)
        }
    }

    /// Waits for the next [`ClientEvent`]. `None` once the connection has
    /// stopped and every event has been taken.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.notifications.recv().await
    }

    /// The next [`ClientEvent`] if one is ready.
    pub fn try_next_event(&mut self) -> Option<ClientEvent> {
        self.notifications.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }

    /// Waits for the connection loop to stop and returns why it did.
    pub async fn closed(mut self) -> CloseReason {
        match (&mut self.task).await {
            Ok(reason) => reason,
            Err(e) => CloseReason::Fault(std::io::Error::other(e)),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.outbox.close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("local_id", &self.config.local_id)
            .field("name", &self.config.name)
            .finish_non_exhaustive()
    }
}

/// The [`Inbound`] hook of a client connection.
struct ClientHandler {
    ctx: ClientCtx,
    table: DispatchTable<ClientCtx>,
    outbox: Outbox,
    /// Set once the stream failed to decode; later bytes are discarded.
    broken: bool,
}

impl Inbound for ClientHandler {
    fn receive(&mut self, inbound: &mut BytesMut) {
        if self.broken {
            inbound.clear();
            return;
        }
        loop {
            match take_frame(&self.ctx.shared.world, inbound, DanglingRefs::Keep) {
                Ok(None) => break,
                Ok(Some(Frame::Message(message))) => {
                    let command = message.command.clone();
                    if let Err(e) = self.table.dispatch(&mut self.ctx, message) {
                        tracing::warn!(%command, code = e.code, error = %e.message, "bad message from server");
                    }
                }
                Ok(Some(Frame::Unresolved { error, .. })) => {
                    tracing::debug!(%error, "skipping frame the mirror can't resolve");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed stream from server, disconnecting");
                    self.outbox.close();
                    self.broken = true;
                    inbound.clear();
                    break;
                }
            }
        }
    }

    fn closed(&mut self, reason: &CloseReason) {
        tracing::info!(%reason, "client connection closed");
        self.ctx.notify(ClientEvent::Closed);
    }
}

fn command_table() -> DispatchTable<ClientCtx> {
    let mut table = DispatchTable::new();
    table
        .register(commands::INIT_LEVELS, init_levels)
        .register(commands::INIT_ENTITIES, init_entities)
        .register(commands::RNG, rng)
        .register(commands::DELTA, delta)
        .register(commands::EVENT, event)
        .register(commands::GOT_BROADCAST, got_broadcast)
        .register(commands::ERR, err);
    table
}

fn bad_record(command: &str, err: impl std::fmt::Display) -> CommandError {
    CommandError::malformed_args(format!("{command}: {err}"))
}

/// `INIT_LEVELS(currentLevelId, levelSave*)`.
fn init_levels(ctx: &mut ClientCtx, mut args: Args) -> Result<(), CommandError> {
    let current: String = args.next()?;
    let saves = args
        .rest::<Value>()?
        .into_iter()
        .map(LevelSave::from_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| bad_record(commands::INIT_LEVELS, e))?;

    let current = (!current.is_empty()).then_some(current);
    ctx.shared.world.lock().replace_levels(current, saves);
    Ok(())
}

/// `INIT_ENTITIES(entityRecord*)`.
fn init_entities(ctx: &mut ClientCtx, mut args: Args) -> Result<(), CommandError> {
    let records = args
        .rest::<Value>()?
        .into_iter()
        .map(EntityRecord::from_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| bad_record(commands::INIT_ENTITIES, e))?;

    ctx.shared.world.lock().replace_entities(records);
    Ok(())
}

/// `RNG(stateWord*)`: the last frame of a bootstrap.
fn rng(ctx: &mut ClientCtx, mut args: Args) -> Result<(), CommandError> {
    let words: Vec<u32> = args.rest()?;
    ctx.shared
        .world
        .lock()
        .set_rng_state(&words)
        .map_err(|e| bad_record(commands::RNG, e))?;
    ctx.notify(ClientEvent::Bootstrapped);
    Ok(())
}

/// `DELTA(changeRecord*)`.
fn delta(ctx: &mut ClientCtx, mut args: Args) -> Result<(), CommandError> {
    let records: Vec<Value> = args.rest()?;
    let mut applied = 0;
    let mut skipped = 0;
    {
        let mut world = ctx.shared.world.lock();
        for record in records {
            let outcome = Change::from_record(record).and_then(|change| world.apply(change));
            match outcome {
                Ok(()) => applied += 1,
                Err(e) => {
                    tracing::trace!(error = %e, "skipping change record");
                    skipped += 1;
                }
            }
        }
    }
    tracing::trace!(applied, skipped, "delta applied");
    ctx.notify(ClientEvent::Delta { applied, skipped });
    Ok(())
}

/// `EVENT(timestamp, localId, source, name, args, kwargs)`.
fn event(ctx: &mut ClientCtx, mut args: Args) -> Result<(), CommandError> {
    let time: f64 = args.next()?;
    let origin: String = args.next()?;
    let event = wire::read_event(&mut args)?.with_origin(origin);

    let handlers = ctx
        .shared
        .events
        .dispatch(&mut ctx.shared.world.lock(), &event);
    tracing::trace!(event = %event.name, origin = %event.origin, handlers, "event received");
    ctx.notify(ClientEvent::Event { time, event });
    Ok(())
}

/// `GOT_BROADCAST(broadcastId, timestamp)`.
fn got_broadcast(ctx: &mut ClientCtx, mut args: Args) -> Result<(), CommandError> {
    let broadcast_id: String = args.next()?;
    let server_time: f64 = args.next()?;

    let acknowledged = ctx.shared.ledger.lock().acknowledge(&broadcast_id, server_time);
    if let Some(acknowledged) = acknowledged {
        acknowledged.notify();
    }
    Ok(())
}

/// `ERR(code, message, extra*)`.
fn err(ctx: &mut ClientCtx, mut args: Args) -> Result<(), CommandError> {
    let remote = RemoteError::from_args(args.rest()?)?;
    // A refused BROADCAST names itself first; its callback never runs.
    if let Some(id) = remote.extra.first().and_then(Value::as_str) {
        if ctx.shared.ledger.lock().forget(id) {
            tracing::debug!(broadcast_id = id, "broadcast refused");
        }
    }
    match remote.category() {
        ErrorCategory::Protocol => tracing::warn!(code = remote.code, message = %remote.message, "server reported a protocol error"),
        ErrorCategory::User | ErrorCategory::Generic => {
            tracing::debug!(code = remote.code, message = %remote.message, "server refused a request");
        }
    }
    ctx.notify(ClientEvent::Error(remote));
    Ok(())
}
