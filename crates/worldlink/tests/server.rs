//! Integration tests for the server, the client, and the full connection
//! flow over real sockets.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use worldlink::prelude::*;
use worldlink::protocol::{Unresolved, commands, decode_message, encode_message};
use worldlink::{LOCAL_PLAYER_COMPONENT, NAME_COMPONENT};

const TIMEOUT: Duration = Duration::from_secs(5);

// =========================================================================
// Helpers
// =========================================================================

fn fast_pacing() -> Pacing {
    Pacing {
        base: Duration::from_millis(2),
        fast: Duration::from_millis(1),
        idle: Duration::from_millis(2),
        read_chunk: 4096,
    }
}

/// Starts a server on a random port. The flush clock is off; tests call
/// [`ServerHandle::flush`] themselves.
async fn start_server() -> ServerHandle {
    let config = ServerConfig::new()
        .bind("127.0.0.1:0")
        .accept_poll(Duration::from_millis(5))
        .flush_rate_hz(0)
        .pacing(fast_pacing());
    Server::bind(config).await.expect("server should bind").spawn()
}

async fn connect(handle: &ServerHandle, name: &str) -> Client {
    connect_with(handle, ClientConfig::new(name)).await
}

async fn connect_with(handle: &ServerHandle, config: ClientConfig) -> Client {
    Client::connect(&handle.local_addr().to_string(), config.pacing(fast_pacing()))
        .await
        .expect("should connect")
}

/// Connects and waits for the bootstrap.
async fn join(handle: &ServerHandle, name: &str) -> Client {
    join_with(handle, ClientConfig::new(name)).await
}

async fn join_with(handle: &ServerHandle, config: ClientConfig) -> Client {
    let mut client = connect_with(handle, config).await;
    next_matching(&mut client, |e| *e == ClientEvent::Bootstrapped).await;
    client
}

async fn next_matching(client: &mut Client, want: impl Fn(&ClientEvent) -> bool) -> ClientEvent {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match client.next_event().await {
                Some(event) if want(&event) => return event,
                Some(_) => {}
                None => panic!("client stopped before the expected event"),
            }
        }
    })
    .await
    .expect("timed out waiting for client event")
}

async fn next_delta(client: &mut Client) -> (usize, usize) {
    match next_matching(client, |e| matches!(e, ClientEvent::Delta { .. })).await {
        ClientEvent::Delta { applied, skipped } => (applied, skipped),
        _ => unreachable!(),
    }
}

async fn next_error(client: &mut Client) -> RemoteError {
    match next_matching(client, |e| matches!(e, ClientEvent::Error(_))).await {
        ClientEvent::Error(err) => err,
        _ => unreachable!(),
    }
}

/// Polls `check` until it holds.
async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

fn player_entity(world: &World, name: &str) -> Option<EntityId> {
    world
        .find(|e| e.get(NAME_COMPONENT).and_then(Value::as_str) == Some(name))
        .map(|e| e.id().clone())
}

/// Reads until one complete frame has arrived and returns it.
async fn read_reply(stream: &mut TcpStream) -> Message {
    let mut buf = Vec::new();
    within(async {
        loop {
            if let Some((message, _)) = decode_message(&mut Unresolved, &buf, 0).unwrap_or(None) {
                return message;
            }
            let mut chunk = [0_u8; 1024];
            let n = stream.read(&mut chunk).await.expect("read");
            assert!(n > 0, "server closed before replying");
            buf.extend_from_slice(&chunk[..n]);
        }
    })
    .await
}

/// Writes `bytes` on a bare socket and returns the first frame the server
/// answers with.
async fn raw_exchange(handle: &ServerHandle, bytes: &[u8]) -> (Message, TcpStream) {
    let mut stream = TcpStream::connect(handle.local_addr()).await.expect("should connect");
    stream.write_all(bytes).await.expect("write");
    let reply = read_reply(&mut stream).await;
    (reply, stream)
}

fn err_code(message: &Message) -> i32 {
    assert_eq!(message.command, commands::ERR);
    match message.args.first() {
        Some(Value::Int32(code)) => *code,
        other => panic!("expected an Int32 code, got {other:?}"),
    }
}

async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(TIMEOUT, fut).await.expect("timed out")
}

// =========================================================================
// JOIN / SNAPSHOT
// =========================================================================

#[tokio::test]
async fn test_join_bootstraps_mirror_with_player_entity() {
    let handle = start_server().await;
    {
        let mut world = handle.world();
        world.register_level("town", Value::Int32(3));
        world.change_level("town").expect("level registered");
    }

    let client = join(&handle, "Alice").await;

    let id = player_entity(&client.world(), "Alice").expect("mirror has the player");
    let world = client.world();
    assert_eq!(world.current_level(), Some("town"));
    assert_eq!(world.entity(id.as_str()).and_then(|e| e.level()), Some("town"));
    assert_eq!(
        world.get(id.as_str(), LOCAL_PLAYER_COMPONENT),
        Some(&Value::String(client.local_id().to_string()))
    );
    drop(world);

    let sessions = handle.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions.joined().count(), 1);
}

#[tokio::test]
async fn test_join_duplicate_name_is_refused_with_203() {
    let handle = start_server().await;
    let _alice = join(&handle, "Alice").await;

    let mut impostor = connect(&handle, "Alice").await;
    let err = next_error(&mut impostor).await;

    assert_eq!(err.code, codes::NAME_TAKEN);
    assert_eq!(err.message, "name taken");
    assert_eq!(err.category(), ErrorCategory::User);
    assert_eq!(handle.sessions().joined().count(), 1);
}

#[tokio::test]
async fn test_join_bootstraps_entities_that_reference_each_other() {
    let handle = start_server().await;
    let (tower, flag) = {
        let mut world = handle.world();
        let tower = world.spawn(None, vec![]).expect("spawn");
        let flag = world
            .spawn(None, vec![("on".into(), Value::Entity(tower.clone()))])
            .expect("spawn");
        (tower, flag)
    };

    let client = join(&handle, "Alice").await;

    let world = client.world();
    assert!(world.contains(tower.as_str()));
    assert_eq!(world.get(flag.as_str(), "on"), Some(&Value::Entity(tower)));
}

#[tokio::test]
async fn test_join_flushes_pending_changes_to_others_first() {
    let handle = start_server().await;
    let mut alice = join(&handle, "Alice").await;
    let lamp = handle.world().spawn(None, vec![]).expect("spawn");

    let mut bob = join(&handle, "Bob").await;

    // Alice hears about the lamp and Bob's player in one DELTA; Bob
    // already has both from his bootstrap and nothing is left over.
    let (_, skipped) = next_delta(&mut alice).await;
    assert_eq!(skipped, 0);
    assert!(alice.world().contains(lamp.as_str()));
    assert!(bob.world().contains(lamp.as_str()));
    assert_eq!(handle.flush(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bob.try_next_event(), None);
}

#[tokio::test]
async fn test_snapshot_sends_bootstrap_again() {
    let handle = start_server().await;
    let mut client = join(&handle, "Alice").await;
    let door = handle
        .world()
        .spawn(None, vec![("kind".into(), "door".into_value())])
        .expect("spawn");

    client.snapshot().expect("connection open");
    next_matching(&mut client, |e| *e == ClientEvent::Bootstrapped).await;

    assert!(client.world().contains(door.as_str()));
}

// =========================================================================
// DELTA
// =========================================================================

#[tokio::test]
async fn test_flush_sends_accumulated_changes_as_one_delta() {
    let handle = start_server().await;
    let mut client = join(&handle, "Alice").await;

    let chest = {
        let mut world = handle.world();
        let chest = world
            .spawn(None, vec![("kind".into(), "chest".into_value())])
            .expect("spawn");
        world.set(&chest, "gold", Value::Int32(5)).expect("set");
        world.set(&chest, "gold", Value::Int32(7)).expect("set");
        chest
    };

    let flushed = handle.flush();
    assert_eq!(flushed, 4);
    assert!(handle.changes().is_empty());

    assert_eq!(next_delta(&mut client).await, (4, 0));
    assert_eq!(client.world().get(chest.as_str(), "gold"), Some(&Value::Int32(7)));
}

#[tokio::test]
async fn test_flush_with_nothing_pending_sends_nothing() {
    let handle = start_server().await;
    let mut client = join(&handle, "Alice").await;

    assert_eq!(handle.flush(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.try_next_event(), None);
}

#[tokio::test]
async fn test_flush_clock_delivers_changes_without_manual_flush() {
    let config = ServerConfig::new()
        .bind("127.0.0.1:0")
        .accept_poll(Duration::from_millis(5))
        .pacing(fast_pacing());
    let handle = Server::bind(config).await.expect("bind").spawn();
    let mut client = join(&handle, "Alice").await;

    let lamp = handle.world().spawn(None, vec![]).expect("spawn");

    within(async {
        while !client.world().contains(lamp.as_str()) {
            next_delta(&mut client).await;
        }
    })
    .await;
}

// =========================================================================
// BROADCAST / EVENT
// =========================================================================

#[tokio::test]
async fn test_broadcast_is_acknowledged_relayed_and_applied() {
    let handle = start_server().await;
    handle.events().on("open", |world, event| {
        let _ = world.set(&event.source, "open", Value::Int32(1));
    });
    let door = handle.world().spawn(None, vec![]).expect("spawn");

    let alice = join(&handle, "Alice").await;
    let mut bob = join(&handle, "Bob").await;

    let (acked, ack_rx) = oneshot::channel();
    let event = Event::new(door.clone(), "open").with_kwarg("force", 2);
    let broadcast_id = alice
        .emit_with(event, move |ack: &Ack| {
            let _ = acked.send(ack.clone());
        })
        .expect("connection open");

    let ack = within(ack_rx).await.expect("ack callback ran");
    assert_eq!(ack.broadcast_id, broadcast_id);
    assert!(ack.server_time > 0.0);
    assert_eq!(alice.pending_broadcasts(), 0);
    assert!(alice.latency().is_some());

    let relayed = next_matching(&mut bob, |e| matches!(e, ClientEvent::Event { .. })).await;
    let ClientEvent::Event { event, .. } = relayed else {
        unreachable!()
    };
    assert_eq!(event.name, "open");
    assert_eq!(event.source, door);
    assert_eq!(event.origin, alice.local_id());
    assert_eq!(event.kwarg("force"), Some(&Value::Int32(2)));

    // The server's handler ran, and its effect reaches everyone.
    assert_eq!(handle.world().get(door.as_str(), "open"), Some(&Value::Int32(1)));
    handle.flush();
    within(async {
        while bob.world().get(door.as_str(), "open").is_none() {
            next_delta(&mut bob).await;
        }
    })
    .await;
}

#[tokio::test]
async fn test_broadcast_is_applied_locally_before_ack() {
    let handle = start_server().await;
    let mut alice = join(&handle, "Alice").await;
    let me = player_entity(&alice.world(), "Alice").expect("player");
    alice.events().on("wave", |world, event| {
        let _ = world.set(&event.source, "waving", Value::Int32(1));
    });

    alice.emit(Event::new(me.clone(), "wave")).expect("connection open");

    assert_eq!(alice.world().get(me.as_str(), "waving"), Some(&Value::Int32(1)));
}

#[tokio::test]
async fn test_broadcast_unknown_source_is_refused_with_204() {
    let handle = start_server().await;
    let mut alice = join(&handle, "Alice").await;
    let mut bob = join(&handle, "Bob").await;

    alice
        .emit(Event::new(EntityId::from("ghost"), "poke"))
        .expect("connection open");
    let err = next_error(&mut alice).await;

    assert_eq!(err.code, codes::UNKNOWN_ENTITY);
    assert_eq!(alice.pending_broadcasts(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Some(event) = bob.try_next_event() {
        assert!(!matches!(event, ClientEvent::Event { .. }), "unexpected relay {event:?}");
    }
}

#[tokio::test]
async fn test_unread_events_past_capacity_are_dropped() {
    let handle = start_server().await;
    let mut alice = join_with(&handle, ClientConfig::new("Alice").event_capacity(2)).await;
    let me = player_entity(&alice.world(), "Alice").expect("player");
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    alice.events().on("ping", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for _ in 0..5 {
        handle.emit(Event::new(me.clone(), "ping")).expect("encodable");
    }
    eventually(|| seen.load(Ordering::SeqCst) == 5).await;

    // Every event reached the mirror, only the notifications were capped.
    let mut queued = 0;
    while alice.try_next_event().is_some() {
        queued += 1;
    }
    assert_eq!(queued, 2);
}

#[tokio::test]
async fn test_server_emit_reaches_joined_clients() {
    let handle = start_server().await;
    let mut alice = join(&handle, "Alice").await;
    let me = player_entity(&alice.world(), "Alice").expect("player");

    let sent = handle
        .emit(Event::new(me, "announce").with_args(values!["welcome"]))
        .expect("encodable");
    assert_eq!(sent, 1);

    let received = next_matching(&mut alice, |e| matches!(e, ClientEvent::Event { .. })).await;
    let ClientEvent::Event { time, event } = received else {
        unreachable!()
    };
    assert!(time > 0.0);
    assert_eq!(event.origin, "server");
    assert_eq!(event.args, values!["welcome"]);
}

// =========================================================================
// LEAVE / disconnect
// =========================================================================

#[tokio::test]
async fn test_leave_destroys_player_entity_and_closes() {
    let handle = start_server().await;
    let alice = join(&handle, "Alice").await;
    let id = player_entity(&handle.world(), "Alice").expect("player");

    alice.stop().expect("connection open");
    within(alice.closed()).await;

    eventually(|| handle.sessions().is_empty()).await;
    assert!(!handle.world().contains(id.as_str()));
}

#[tokio::test]
async fn test_disconnect_without_leave_keeps_entity_for_rejoin() {
    let handle = start_server().await;
    let alice = join(&handle, "Alice").await;
    let id = player_entity(&handle.world(), "Alice").expect("player");

    drop(alice);
    eventually(|| handle.sessions().is_empty()).await;
    assert!(handle.world().contains(id.as_str()));

    let again = join(&handle, "Alice").await;
    assert_eq!(player_entity(&handle.world(), "Alice"), Some(id.clone()));
    assert_eq!(
        handle.world().get(id.as_str(), LOCAL_PLAYER_COMPONENT),
        Some(&Value::String(again.local_id().to_string()))
    );
}

#[tokio::test]
async fn test_closed_client_refuses_emit() {
    let handle = start_server().await;
    let alice = join(&handle, "Alice").await;
    let me = player_entity(&alice.world(), "Alice").expect("player");

    alice.stop().expect("connection open");

    assert!(matches!(
        alice.emit(Event::new(me, "wave")),
        Err(WorldlinkError::Closed)
    ));
}

#[tokio::test]
async fn test_shutdown_closes_client_connections() {
    let handle = start_server().await;
    let mut alice = join(&handle, "Alice").await;

    handle.shutdown();

    next_matching(&mut alice, |e| *e == ClientEvent::Closed).await;
}

// =========================================================================
// Bare sockets
// =========================================================================

#[tokio::test]
async fn test_leave_before_join_is_refused_with_202() {
    let handle = start_server().await;
    let leave = encode_message(&Message::bare(commands::LEAVE)).expect("encode");

    let (reply, _stream) = raw_exchange(&handle, &leave).await;

    assert_eq!(err_code(&reply), codes::NOT_JOINED);
}

#[tokio::test]
async fn test_malformed_frame_gets_102_then_close() {
    let handle = start_server().await;
    // A value section with a tag nobody registered.
    let garbage = [0, 1, b'X', 0, 1, 0, 0, 0, 0, 0, 2, b'?', b'?', 0, 0];

    let (reply, mut stream) = raw_exchange(&handle, &garbage).await;
    assert_eq!(err_code(&reply), codes::MALFORMED_FRAME);

    let mut rest = Vec::new();
    within(stream.read_to_end(&mut rest)).await.expect("clean close");
}

#[tokio::test]
async fn test_frame_split_across_writes_is_reassembled() {
    let handle = start_server().await;
    let leave = encode_message(&Message::bare(commands::LEAVE)).expect("encode");
    let (head, tail) = leave.split_at(3);

    let mut stream = TcpStream::connect(handle.local_addr()).await.expect("connect");
    stream.write_all(head).await.expect("write");
    tokio::time::sleep(Duration::from_millis(30)).await;

    stream.write_all(tail).await.expect("write");
    let reply = read_reply(&mut stream).await;

    assert_eq!(err_code(&reply), codes::NOT_JOINED);
}

#[tokio::test]
async fn test_malformed_broadcast_refusal_names_the_broadcast() {
    let handle = start_server().await;
    let broadcast = encode_message(&Message::new(commands::BROADCAST, values!["b-7", 3_i32]))
        .expect("encode");

    let (reply, _stream) = raw_exchange(&handle, &broadcast).await;

    assert_eq!(err_code(&reply), codes::MALFORMED_ARGS);
    assert_eq!(reply.args.last(), Some(&Value::String("b-7".into())));
}
