// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items,
    clippy::significant_drop_tightening
)]

//! Offline send -> reconnect -> queue flush -> acknowledgment.
//!
//! The message is created while both delivery paths are down, appears
//! locally as `Sending`, survives failed attempts in the retry queue,
//! and is delivered exactly once over the socket after the link and the
//! session come back.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use webchat::client::{AuthState, ChatClient, ConnectionState};
use webchat::config::{ClientConfig, OutboxConfig};
use webchat::crypto::NoopCipher;
use webchat::rest::{InMemoryBackend, StaticToken};
use webchat::transport::loopback::{LoopbackServer, LoopbackTransport};
use webchat_proto::message::{ConversationId, MessageId, MessageKey, MessageStatus, UserId};
use webchat_proto::wire::{ClientFrame, SendAck, ServerFrame};

type TestClient = ChatClient<NoopCipher, LoopbackTransport, Arc<InMemoryBackend>>;

fn fast_outbox() -> OutboxConfig {
    OutboxConfig {
        max_retries: 100,
        base_delay: Duration::from_millis(50),
        send_interval: Duration::from_millis(10),
        retry_interval: Duration::from_millis(10),
        jitter: 0.0,
        ..OutboxConfig::default()
    }
}

struct Fixture {
    client: Arc<TestClient>,
    server: Arc<LoopbackServer>,
    backend: Arc<InMemoryBackend>,
    sends: Arc<Mutex<Vec<MessageId>>>,
}

fn make_fixture() -> Fixture {
    let config = ClientConfig {
        outbox: fast_outbox(),
        ..ClientConfig::default()
    };
    let (transport, server) = LoopbackTransport::create(64);
    let server = Arc::new(server);
    let backend = Arc::new(InMemoryBackend::new());

    let client = Arc::new(ChatClient::new(
        &config,
        UserId::new("me"),
        "Me",
        NoopCipher,
        transport,
        Arc::clone(&backend),
        Arc::new(StaticToken::new("tok")),
    ));

    let sends = Arc::new(Mutex::new(Vec::new()));
    let send_log = Arc::clone(&sends);
    let script_server = Arc::clone(&server);
    tokio::spawn(async move {
        while let Some(frame) = script_server.recv_frame().await {
            match frame {
                ClientFrame::Authenticate { .. } => {
                    script_server
                        .push_frame(ServerFrame::Authenticated {
                            user_id: UserId::new("me"),
                        })
                        .await;
                }
                ClientFrame::SendMessage { temp_id, .. } => {
                    let id = MessageId::new(format!("srv-{temp_id}"));
                    send_log.lock().push(id.clone());
                    script_server
                        .ack(SendAck {
                            temp_id,
                            success: true,
                            message_id: Some(id),
                            error: None,
                        })
                        .await;
                }
                _ => {}
            }
        }
    });

    Fixture {
        client,
        server,
        backend,
        sends,
    }
}

async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached before deadline");
}

#[tokio::test(start_paused = true)]
async fn offline_message_is_flushed_after_reconnect() {
    let fx = make_fixture();
    fx.client.start();

    // Fully offline: the socket is severed and the HTTP fallback errors.
    fx.server.sever().await;
    fx.backend.set_fail_posts(true);
    wait_until(|| fx.client.connection_state() == ConnectionState::Disconnected).await;

    let conv = ConversationId::new("c1");
    let message = fx.client.send_message("hello", Some(conv.clone())).unwrap();
    let temp = *message.temp_id().unwrap();

    // The optimistic record is visible immediately with status Sending.
    let local = fx.client.messages_for(&conv);
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].status, MessageStatus::Sending);

    // Let a few fallback attempts fail and land in the retry queue.
    wait_until(|| !fx.backend.posted().is_empty()).await;
    assert!(
        fx.client
            .message(&MessageKey::Pending(temp))
            .is_some_and(|m| m.status == MessageStatus::Sending),
        "message must stay Sending while attempts are retried"
    );

    // Connection restored; the session re-authenticates and the queue is
    // flushed over the socket.
    fx.server.restore().await;
    wait_until(|| fx.client.auth_state() == AuthState::Authenticated).await;

    let expected_id = MessageId::new(format!("srv-{temp}"));
    wait_until(|| {
        fx.client
            .message(&MessageKey::Confirmed(expected_id.clone()))
            .is_some_and(|m| m.status == MessageStatus::Sent)
    })
    .await;

    // The pending key no longer resolves and exactly one copy crossed the
    // socket.
    assert!(fx.client.message(&MessageKey::Pending(temp)).is_none());
    assert_eq!(fx.sends.lock().len(), 1);
    assert_eq!(fx.client.messages_for(&conv).len(), 1);

    fx.client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn messages_queued_offline_flush_in_order() {
    let fx = make_fixture();
    fx.client.start();

    fx.server.sever().await;
    fx.backend.set_fail_posts(true);
    wait_until(|| fx.client.connection_state() == ConnectionState::Disconnected).await;

    let conv = ConversationId::new("c1");
    let first = fx.client.send_message("first", Some(conv.clone())).unwrap();
    let second = fx.client.send_message("second", Some(conv.clone())).unwrap();

    fx.server.restore().await;
    wait_until(|| fx.sends.lock().len() == 2).await;

    wait_until(|| {
        fx.client
            .messages_for(&conv)
            .iter()
            .all(|m| m.status == MessageStatus::Sent)
    })
    .await;

    // Chronological order is preserved through the queue.
    let texts: Vec<String> = fx
        .client
        .messages_for(&conv)
        .iter()
        .map(|m| m.text.clone())
        .collect();
    assert_eq!(texts, vec!["first", "second"]);
    assert!(first.timestamp <= second.timestamp);

    fx.client.shutdown();
}
