//! Per-session handling on the server: frame decoding and the command
//! handlers.
//!
//! Each accepted connection gets a [`SessionHandler`], which its
//! connection loop calls after every read. The flow per read is:
//!   1. Decode every complete frame at the front of the inbound buffer,
//!      against the server's world
//!   2. Dispatch each message to its command handler, in arrival order
//!   3. Reply `ERR` for refused commands; close the session if the stream
//!      itself is corrupt
//!
//! The commands a client may send:
//!
//! | command | reply |
//! |---|---|
//! | `JOIN(localId, name)` | bootstrap, or `ERR` 201 / 203 |
//! | `SNAPSHOT()` | bootstrap |
//! | `LEAVE()` | session closes, or `ERR` 202 |
//! | `BROADCAST(id, source, name, args, kwargs)` | `GOT_BROADCAST(id, time)`, or `ERR` 204 |

use std::sync::Arc;

use bytes::BytesMut;
use worldlink_protocol::{
    DanglingRefs, EntityId, IntoValue, Message, ResolveError, Value, commands, encode_message,
};
use worldlink_session::{Args, CommandError, DispatchTable, PlayerBinding, codes};
use worldlink_transport::{CloseReason, ConnectionId, Inbound, Outbox};
use worldlink_world::{EntityTemplate, World, WorldError};

use crate::server::{Shared, flush_to};
use crate::wire::{self, Frame, take_frame};

/// Component holding a player entity's display name.
pub const NAME_COMPONENT: &str = "name";
/// Component holding the local id of the client controlling an entity.
pub const LOCAL_PLAYER_COMPONENT: &str = "localplayer";

/// What a command handler gets to work with.
pub(crate) struct SessionCtx {
    pub(crate) id: ConnectionId,
    pub(crate) outbox: Outbox,
    pub(crate) shared: Arc<Shared>,
}

impl SessionCtx {
    /// Encodes and queues one message on this session.
    fn send(&self, message: &Message) {
        match encode_message(message) {
            Ok(frame) => {
                self.outbox.send(frame);
            }
            Err(e) => {
                tracing::warn!(conn_id = %self.id, command = %message.command, error = %e, "dropping unencodable reply");
            }
        }
    }

    fn refuse(&self, err: &CommandError) {
        tracing::debug!(conn_id = %self.id, code = err.code, message = %err.message, "command refused");
        self.send(&err.to_message());
    }
}

/// The [`Inbound`] hook of one server session.
pub(crate) struct SessionHandler {
    ctx: SessionCtx,
    table: Arc<DispatchTable<SessionCtx>>,
    /// Set once the stream failed to decode. Nothing after that point can
    /// be trusted, so later bytes are discarded until the loop stops.
    broken: bool,
}

impl SessionHandler {
    pub(crate) fn new(ctx: SessionCtx, table: Arc<DispatchTable<SessionCtx>>) -> Self {
        Self {
            ctx,
            table,
            broken: false,
        }
    }
}

impl Inbound for SessionHandler {
    fn receive(&mut self, inbound: &mut BytesMut) {
        if self.broken {
            inbound.clear();
            return;
        }
        loop {
            match take_frame(&self.ctx.shared.world, inbound, DanglingRefs::Reject) {
                Ok(None) => break,
                Ok(Some(Frame::Message(message))) => {
                    tracing::trace!(conn_id = %self.ctx.id, command = %message.command, "frame");
                    if let Err(err) = self.table.dispatch(&mut self.ctx, message) {
                        self.ctx.refuse(&err);
                    }
                }
                Ok(Some(Frame::Unresolved { error, raw })) => {
                    let mut err = unresolved(error);
                    if let Some(id) = raw.as_ref().and_then(wire::broadcast_id) {
                        err = err.with_extra(id);
                    }
                    self.ctx.refuse(&err);
                }
                Err(e) => {
                    tracing::warn!(conn_id = %self.ctx.id, error = %e, "malformed stream, closing session");
                    self.ctx
                        .send(&CommandError::new(codes::MALFORMED_FRAME, e.to_string()).to_message());
                    self.ctx.outbox.close();
                    self.broken = true;
                    inbound.clear();
                    break;
                }
            }
        }
    }

    fn closed(&mut self, reason: &CloseReason) {
        // An abrupt disconnect keeps the player's entity; a later JOIN
        // under the same name binds to it again.
        let binding = self.ctx.shared.sessions.lock().remove(self.ctx.id);
        tracing::info!(
            conn_id = %self.ctx.id,
            %reason,
            player = binding.as_ref().map(|b| b.name.as_str()),
            "session closed"
        );
    }
}

/// The reply for a frame that referenced something the world can't resolve.
fn unresolved(err: ResolveError) -> CommandError {
    match err {
        ResolveError::UnknownEntity(id) => {
            CommandError::new(codes::UNKNOWN_ENTITY, format!("unknown entity {id}"))
        }
        other => CommandError::malformed_args(other.to_string()),
    }
}

fn internal(err: impl std::fmt::Display) -> CommandError {
    CommandError::new(codes::INTERNAL, err.to_string())
}

/// The server's command table.
pub(crate) fn command_table() -> DispatchTable<SessionCtx> {
    let mut table = DispatchTable::new();
    table
        .register(commands::JOIN, join)
        .register(commands::SNAPSHOT, snapshot)
        .register(commands::LEAVE, leave)
        .register(commands::BROADCAST, broadcast);
    table
}

/// `JOIN(localId, name)`.
fn join(ctx: &mut SessionCtx, mut args: Args) -> Result<(), CommandError> {
    let local_id: String = args.next()?;
    let name: String = args.next()?;

    // Held until the bootstrap is queued, so no DELTA can reach this
    // session ahead of it.
    let mut sessions = ctx.shared.sessions.lock();
    sessions.check_join(ctx.id, &name)?;

    let mut world = ctx.shared.world.lock();
    let entity =
        bind_player(&mut world, &ctx.shared.template, &local_id, &name).map_err(internal)?;
    // Everyone else catches up now. The joiner gets the same state in its
    // bootstrap, and its first DELTA starts after it.
    flush_to(&sessions, &ctx.shared.changes);
    let frames = wire::bootstrap(&world).map_err(internal)?;
    drop(world);

    sessions.join(
        ctx.id,
        PlayerBinding {
            entity,
            local_id,
            name,
        },
    )?;
    ctx.outbox.send(frames);
    Ok(())
}

/// Finds the entity a joining player should control, or creates one.
///
/// An entity that already carries this `name` and a `localplayer`
/// component is rebound to `local_id`. Otherwise a new entity is made in
/// the current level from `template` plus those two components.
pub(crate) fn bind_player(
    world: &mut World,
    template: &EntityTemplate,
    local_id: &str,
    name: &str,
) -> Result<EntityId, WorldError> {
    let existing = world
        .find(|e| {
            e.get(NAME_COMPONENT).and_then(Value::as_str) == Some(name)
                && e.has(LOCAL_PLAYER_COMPONENT)
        })
        .map(|e| e.id().clone());

    match existing {
        Some(id) => {
            world.set(&id, LOCAL_PLAYER_COMPONENT, local_id.into_value())?;
            tracing::debug!(entity = %id, name, "rebinding existing player entity");
            Ok(id)
        }
        None => {
            let level = world.current_level().map(str::to_string);
            let components = template.instantiate(vec![
                (NAME_COMPONENT.to_string(), name.into_value()),
                (LOCAL_PLAYER_COMPONENT.to_string(), local_id.into_value()),
            ]);
            world.spawn(level, components)
        }
    }
}

/// `SNAPSHOT()`: the bootstrap again.
fn snapshot(ctx: &mut SessionCtx, _args: Args) -> Result<(), CommandError> {
    let frames = wire::bootstrap(&ctx.shared.world.lock()).map_err(internal)?;
    ctx.outbox.send(frames);
    Ok(())
}

/// `LEAVE()`: destroys the player's entity and closes the session once
/// everything queued so far has been written.
fn leave(ctx: &mut SessionCtx, _args: Args) -> Result<(), CommandError> {
    let binding = ctx.shared.sessions.lock().leave(ctx.id)?;
    if let Err(e) = ctx.shared.world.lock().destroy(&binding.entity) {
        tracing::debug!(conn_id = %ctx.id, error = %e, "player entity already gone");
    }
    ctx.outbox.close();
    Ok(())
}

/// `BROADCAST(broadcastId, source, name, args, kwargs)`: relays the event
/// to every other joined session, applies it here, and acknowledges it.
/// Every refusal after the id has been read carries it as its first extra
/// argument, so the sender can drop the pending broadcast.
fn broadcast(ctx: &mut SessionCtx, mut args: Args) -> Result<(), CommandError> {
    let broadcast_id: String = args.next()?;
    relay_broadcast(ctx, &broadcast_id, args).map_err(|e| e.with_extra(broadcast_id))
}

fn relay_broadcast(
    ctx: &mut SessionCtx,
    broadcast_id: &str,
    mut args: Args,
) -> Result<(), CommandError> {
    let mut event = wire::read_event(&mut args)?;

    let sessions = ctx.shared.sessions.lock();
    event.origin = sessions
        .binding(ctx.id)
        .map(|b| b.local_id.clone())
        .unwrap_or_default();

    let mut world = ctx.shared.world.lock();
    if !world.contains(event.source.as_str()) {
        return Err(CommandError::new(
            codes::UNKNOWN_ENTITY,
            format!("unknown entity {}", event.source),
        ));
    }

    let time = wire::unix_time();
    let relay = encode_message(&wire::event_message(time, &event)).map_err(internal)?;
    let relayed = sessions.others(ctx.id).filter(|s| s.outbox.send(relay.clone())).count();
    drop(sessions);

    let handlers = ctx.shared.events.dispatch(&mut world, &event);
    drop(world);

    tracing::debug!(
        conn_id = %ctx.id,
        event = %event.name,
        source = %event.source,
        relayed,
        handlers,
        "broadcast"
    );
    ctx.send(&Message::new(
        commands::GOT_BROADCAST,
        vec![broadcast_id.into_value(), Value::Float64(time)],
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_bind_player_creates_entity_from_template() {
        let mut world = World::new();
        world.register_level("town", Value::Int32(0));
        world.change_level("town").unwrap();
        let template = EntityTemplate::new().with("hp", json!(10));

        let id = bind_player(&mut world, &template, "local-1", "Alice").unwrap();

        let entity = world.entity(id.as_str()).unwrap();
        assert_eq!(entity.level(), Some("town"));
        assert_eq!(entity.get("hp"), Some(&Value::Int32(10)));
        assert_eq!(entity.get(NAME_COMPONENT), Some(&Value::String("Alice".into())));
        assert_eq!(
            entity.get(LOCAL_PLAYER_COMPONENT),
            Some(&Value::String("local-1".into()))
        );
    }

    #[test]
    fn test_bind_player_rebinds_existing_player_entity() {
        let mut world = World::new();
        let template = EntityTemplate::new();
        let first = bind_player(&mut world, &template, "local-1", "Alice").unwrap();

        let second = bind_player(&mut world, &template, "local-2", "Alice").unwrap();

        assert_eq!(first, second);
        assert_eq!(world.len(), 1);
        assert_eq!(
            world.get(first.as_str(), LOCAL_PLAYER_COMPONENT),
            Some(&Value::String("local-2".into()))
        );
    }

    #[test]
    fn test_bind_player_ignores_named_entities_without_localplayer() {
        let mut world = World::new();
        let npc = world
            .spawn(None, vec![(NAME_COMPONENT.into(), "Alice".into_value())])
            .unwrap();

        let player = bind_player(&mut world, &EntityTemplate::new(), "local-1", "Alice").unwrap();

        assert_ne!(npc, player);
        assert_eq!(world.len(), 2);
    }

    #[test]
    fn test_unresolved_unknown_entity_is_204() {
        let err = unresolved(ResolveError::UnknownEntity(EntityId::from("ghost")));
        assert_eq!(err.code, codes::UNKNOWN_ENTITY);
        assert!(err.message.contains("ghost"));
        assert_eq!(unresolved(ResolveError::NoGlobalWindow).code, codes::MALFORMED_ARGS);
    }
}
