//! Message shapes shared by the client and the server, and the inbound
//! frame pump both of them run.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use worldlink_protocol::{
    DanglingRefs, DecodeError, EncodeError, IntoValue, Message, ResolveError, Resolver, Staged,
    Unresolved, Value, commands, decode_message, encode_message, frame_len,
};
use worldlink_session::{Args, CommandError};
use worldlink_world::{Event, World};

/// Seconds since the Unix epoch on this machine's clock.
pub(crate) fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// What the frame pump found at the front of an inbound buffer.
pub(crate) enum Frame {
    /// A complete, resolved message.
    Message(Message),
    /// A complete frame that referenced something this world can't
    /// resolve. The frame has been skipped.
    Unresolved {
        error: ResolveError,
        /// The same frame decoded without resolving any reference, so a
        /// refusal can still name what it refuses.
        raw: Option<Message>,
    },
}

/// The id a BROADCAST frame asks to be acknowledged under.
pub(crate) fn broadcast_id(message: &Message) -> Option<&str> {
    if message.command != commands::BROADCAST {
        return None;
    }
    message.args.first().and_then(Value::as_str)
}

/// Takes the next complete frame off the front of `inbound`, decoding it
/// against `world`.
///
/// `dangling` decides whether an entity reference the world doesn't know
/// skips the frame or decodes as a bare id. Component references in the
/// frame are applied to `world` only once every value has resolved.
///
/// `Ok(None)` when the buffer holds no complete frame yet: either it is
/// empty or the frame at its front is still arriving. The buffer is left
/// untouched in that case.
///
/// # Errors
/// Any [`DecodeError`] other than `Incomplete` or `Resolve`: the stream
/// can't be read past this point.
pub(crate) fn take_frame(
    world: &Mutex<World>,
    inbound: &mut BytesMut,
    dangling: DanglingRefs,
) -> Result<Option<Frame>, DecodeError> {
    let decoded = {
        let mut world = world.lock();
        let mut staged = Staged::new(&*world, dangling);
        let decoded = decode_message(&mut staged, &inbound[..], 0)
            .map(|found| found.map(|(message, rest)| (message, rest.len())));
        let writes = staged.into_writes();
        match decoded {
            // Owners were checked under this same lock.
            Ok(Some(found)) => writes
                .iter()
                .try_for_each(|w| world.sync_component(&w.owner, &w.name, &w.value))
                .map(|()| Some(found))
                .map_err(DecodeError::from),
            other => other,
        }
    };

    match decoded {
        Ok(None) => Ok(None),
        Ok(Some((message, remaining))) => {
            let used = inbound.len() - remaining;
            inbound.advance(used);
            Ok(Some(Frame::Message(message)))
        }
        Err(e) if e.is_incomplete() => Ok(None),
        Err(DecodeError::Resolve(error)) => {
            // The frame is complete, only its contents are stale.
            let raw = decode_message(&mut Unresolved, &inbound[..], 0)
                .ok()
                .flatten()
                .map(|(message, _)| message);
            let used = frame_len(&inbound[..])?.unwrap_or(inbound.len());
            inbound.advance(used);
            Ok(Some(Frame::Unresolved { error, raw }))
        }
        Err(e) => Err(e),
    }
}

/// `INIT_LEVELS`, `INIT_ENTITIES`, and `RNG` for `world`, as one buffer.
pub(crate) fn bootstrap(world: &World) -> Result<Bytes, EncodeError> {
    let mut levels = vec![world.current_level().unwrap_or_default().into_value()];
    levels.extend(world.level_saves().into_iter().map(IntoValue::into_value));

    let entities = world
        .entity_records()
        .into_iter()
        .map(IntoValue::into_value)
        .collect();

    let rng = world.rng_state().into_iter().map(Value::UInt32).collect();

    let mut out = BytesMut::new();
    for message in [
        Message::new(commands::INIT_LEVELS, levels),
        Message::new(commands::INIT_ENTITIES, entities),
        Message::new(commands::RNG, rng),
    ] {
        out.extend_from_slice(&encode_message(&message)?);
    }
    Ok(out.freeze())
}

/// `EVENT(timestamp, localId, sourceEntity, eventName, args, kwargs)`.
pub(crate) fn event_message(time: f64, event: &Event) -> Message {
    Message::new(
        commands::EVENT,
        vec![
            Value::Float64(time),
            event.origin.as_str().into_value(),
            (&event.source).into_value(),
            event.name.as_str().into_value(),
            Value::List(event.args.clone()),
            event.kwargs_value(),
        ],
    )
}

/// `BROADCAST(broadcastId, sourceEntity, eventName, args, kwargs)`.
pub(crate) fn broadcast_message(broadcast_id: &str, event: &Event) -> Message {
    Message::new(
        commands::BROADCAST,
        vec![
            broadcast_id.into_value(),
            (&event.source).into_value(),
            event.name.as_str().into_value(),
            Value::List(event.args.clone()),
            event.kwargs_value(),
        ],
    )
}

/// Reads the `source, name, args, kwargs` tail shared by EVENT and
/// BROADCAST. Missing `args` and `kwargs` default to empty.
pub(crate) fn read_event(args: &mut Args) -> Result<Event, CommandError> {
    let source = args.next()?;
    let name: String = args.next()?;
    let positional: Vec<Value> = args.optional()?.unwrap_or_default();
    let kwargs = match args.optional::<Value>()? {
        Some(value) => Event::kwargs_from_value(value).map_err(|e| {
            CommandError::malformed_args(format!("{}: kwargs: {e}", args.command()))
        })?,
        None => Vec::new(),
    };

    let mut event = Event::new(source, name).with_args(positional);
    event.kwargs = kwargs;
    Ok(event)
}
