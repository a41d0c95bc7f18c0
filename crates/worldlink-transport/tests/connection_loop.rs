//! Integration tests for the TCP listener and the connection loop.
//!
//! These spin up a real listener on a random port and drive one side with
//! a [`ConnectionLoop`] and the other with a plain Tokio stream.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use worldlink_transport::{
    CloseReason, ConnectionLoop, Inbound, Outbox, Pacing, TcpTransport, connect,
};

/// Echoes every byte it receives and reports each chunk it consumed.
struct Echo {
    outbox: Outbox,
    seen: mpsc::UnboundedSender<Vec<u8>>,
}

impl Inbound for Echo {
    fn receive(&mut self, inbound: &mut BytesMut) {
        let chunk = inbound.split().freeze();
        let _ = self.seen.send(chunk.to_vec());
        self.outbox.send(chunk);
    }
}

fn fast_pacing() -> Pacing {
    Pacing {
        base: Duration::from_millis(2),
        fast: Duration::from_millis(1),
        idle: Duration::from_millis(3),
        read_chunk: 64,
    }
}

/// Binds a transport and returns it with its address.
async fn listen() -> (TcpTransport, String) {
    let transport = TcpTransport::bind("127.0.0.1:0", 5).await.expect("should bind");
    let addr = transport.local_addr().expect("local addr").to_string();
    (transport, addr)
}

#[tokio::test]
async fn test_connection_loop_echoes_in_order() {
    let (transport, addr) = listen().await;

    let server = tokio::spawn(async move {
        let (id, stream, _) = transport
            .accept(Duration::from_millis(5))
            .await
            .expect("should accept");
        let (conn, outbox) = ConnectionLoop::new(id, stream, fast_pacing());
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        let reason = conn.run(Echo { outbox, seen: seen_tx }).await;
        (reason, seen_rx)
    });

    let mut client = connect(&addr).await.expect("should connect");
    // More than one read chunk, so the loop needs several ticks.
    let payload: Vec<u8> = (0..200u8).collect();
    client.write_all(&payload).await.unwrap();

    let mut echoed = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
        .await
        .expect("echo should arrive")
        .unwrap();
    assert_eq!(echoed, payload);

    drop(client);
    let (reason, mut seen_rx) = server.await.unwrap();
    assert!(matches!(reason, CloseReason::PeerClosed), "got {reason}");

    let mut seen = Vec::new();
    while let Ok(chunk) = seen_rx.try_recv() {
        seen.extend(chunk);
    }
    assert_eq!(seen, payload);
}

#[tokio::test]
async fn test_outbox_close_flushes_queued_frames_first() {
    let (transport, addr) = listen().await;

    let server = tokio::spawn(async move {
        let (id, stream, _) = transport.accept(Duration::from_millis(5)).await.unwrap();
        let (conn, outbox) = ConnectionLoop::new(id, stream, fast_pacing());
        outbox.send(Bytes::from_static(b"bye"));
        outbox.close();
        // Queued after the close: must never be written.
        outbox.send(Bytes::from_static(b"late"));
        let (seen, _rx) = mpsc::unbounded_channel();
        conn.run(Echo { outbox, seen }).await
    });

    let mut client = connect(&addr).await.unwrap();
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut received))
        .await
        .expect("server should close")
        .unwrap();

    assert_eq!(received, b"bye");
    let reason = server.await.unwrap();
    assert!(matches!(reason, CloseReason::Requested));
}

#[tokio::test]
async fn test_outbox_reports_closed_after_loop_exits() {
    let (transport, addr) = listen().await;

    let accept = tokio::spawn(async move {
        transport.accept(Duration::from_millis(5)).await.unwrap()
    });
    let client = connect(&addr).await.unwrap();
    let (id, stream, _) = accept.await.unwrap();

    let (conn, outbox) = ConnectionLoop::new(id, stream, fast_pacing());
    let (seen, _rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(conn.run(Echo { outbox: outbox.clone(), seen }));

    assert!(!outbox.is_closed());
    drop(client);
    handle.await.unwrap();
    assert!(outbox.is_closed());
    assert!(!outbox.send(Bytes::from_static(b"x")));
}

#[tokio::test]
async fn test_try_accept_without_pending_connection_returns_none() {
    let (transport, _addr) = listen().await;
    assert!(transport.try_accept().unwrap().is_none());
}
