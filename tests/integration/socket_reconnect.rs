// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Socket transport reconnection against a real in-process WebSocket
//! server: backoff sequencing, recovery after a dropped connection, and
//! the terminal failure once attempts are exhausted.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use webchat::config::ReconnectConfig;
use webchat::transport::socket::SocketTransport;
use webchat::transport::{Transport, TransportEvent};

fn test_config(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        connect_timeout: Duration::from_secs(2),
        base_delay: Duration::from_millis(20),
        backoff_factor: 2.0,
        max_attempts,
        jitter: 0.0,
        event_channel_capacity: 64,
    }
}

/// Server that accepts connections and keeps them open, except for the
/// first `drop_first` connections, which it closes shortly after the
/// handshake. Connections are counted through the returned counter.
async fn start_flaky_server(
    drop_first: usize,
) -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{addr}/socket");
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let drop_this = n < drop_first;
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                if drop_this {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let _ = ws.close(None).await;
                    return;
                }
                // Keep the connection open, discarding client frames.
                while let Some(Ok(msg)) = ws.next().await {
                    if let Message::Ping(data) = msg {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                }
            });
        }
    });

    (url, accepted, handle)
}

async fn next_event(transport: &SocketTransport) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(10), transport.next_event())
        .await
        .expect("no transport event before timeout")
        .unwrap()
}

#[tokio::test]
async fn unreachable_server_fails_terminally_after_max_attempts() {
    // Port 1 is essentially guaranteed closed.
    let transport = SocketTransport::connect("ws://127.0.0.1:1/socket", test_config(3)).unwrap();

    let mut delays = Vec::new();
    loop {
        match next_event(&transport).await {
            TransportEvent::Reconnecting { attempt, delay } => {
                assert_eq!(attempt as usize, delays.len() + 1);
                delays.push(delay);
            }
            TransportEvent::ConnectionFailed => break,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // Exactly max_attempts scheduled, with monotonically growing delays.
    assert_eq!(delays.len(), 3);
    for pair in delays.windows(2) {
        assert!(pair[1] >= pair[0], "backoff must not shrink: {pair:?}");
    }

    // Terminal: no more events arrive.
    let extra = tokio::time::timeout(Duration::from_millis(300), transport.next_event()).await;
    assert!(extra.is_err(), "no events expected after terminal failure");
}

#[tokio::test]
async fn dropped_connection_recovers_through_backoff() {
    let (url, accepted, _server) = start_flaky_server(1).await;
    let transport = SocketTransport::connect(&url, test_config(5)).unwrap();

    // First connection comes up, then the server drops it.
    assert_eq!(next_event(&transport).await, TransportEvent::Connected);
    assert!(matches!(
        next_event(&transport).await,
        TransportEvent::Disconnected { .. }
    ));

    // Backoff, reconnect, and the second connection stays up.
    assert!(matches!(
        next_event(&transport).await,
        TransportEvent::Reconnecting { attempt: 1, .. }
    ));
    assert_eq!(next_event(&transport).await, TransportEvent::Connected);
    assert!(transport.is_connected());
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reconnect_resets_the_attempt_counter() {
    // Two flaky connections in a row: each successful connect resets the
    // counter, so both reconnects report attempt 1.
    let (url, _accepted, _server) = start_flaky_server(2).await;
    let transport = SocketTransport::connect(&url, test_config(5)).unwrap();

    let mut attempts_seen = Vec::new();
    let mut connects = 0;
    while connects < 3 {
        match next_event(&transport).await {
            TransportEvent::Connected => connects += 1,
            TransportEvent::Reconnecting { attempt, .. } => attempts_seen.push(attempt),
            TransportEvent::Disconnected { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    assert_eq!(attempts_seen, vec![1, 1]);
}
