// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items,
    clippy::significant_drop_tightening
)]

//! Stale sync cancellation: switching the active conversation mid-sync
//! must never let the slower, superseded response overwrite the newer
//! conversation's state.

use std::sync::Arc;
use std::time::Duration;

use webchat::client::ChatClient;
use webchat::config::ClientConfig;
use webchat::crypto::NoopCipher;
use webchat::rest::{InMemoryBackend, StaticToken};
use webchat::transport::loopback::LoopbackTransport;
use webchat_proto::message::{ConversationId, UserId};
use webchat_proto::normalize::{RawMessage, RawTimestamp};

type TestClient = ChatClient<NoopCipher, LoopbackTransport, Arc<InMemoryBackend>>;

fn raw_message(id: &str, conversation: &str, text: &str, ts: u64) -> RawMessage {
    RawMessage {
        id: Some(id.into()),
        temp_id: None,
        conversation_id: conversation.into(),
        sender_id: "u2".into(),
        sender_name: None,
        text: text.into(),
        timestamp: Some(RawTimestamp::Millis(ts)),
        status: Some("delivered".into()),
    }
}

fn make_client() -> (Arc<TestClient>, Arc<InMemoryBackend>) {
    let (transport, _server) = LoopbackTransport::create(64);
    let backend = Arc::new(InMemoryBackend::new());
    let client = Arc::new(ChatClient::new(
        &ClientConfig::default(),
        UserId::new("me"),
        "Me",
        NoopCipher,
        transport,
        Arc::clone(&backend),
        Arc::new(StaticToken::new("tok")),
    ));
    (client, backend)
}

async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached before deadline");
}

#[tokio::test(start_paused = true)]
async fn slow_superseded_sync_response_is_discarded() {
    let (client, backend) = make_client();
    let conv_x = ConversationId::new("x");
    let conv_y = ConversationId::new("y");

    backend.seed_messages(&conv_x, vec![raw_message("mx", "x", "from x", 100)]);
    backend.seed_messages(&conv_y, vec![raw_message("my", "y", "from y", 200)]);
    // X's fetch is slow; Y's answers immediately.
    backend.delay_messages_fetch(&conv_x, Duration::from_millis(500));

    client.select_conversation(conv_x.clone());
    client.select_conversation(conv_y.clone());

    // Y's sync lands.
    wait_until(|| !client.messages_for(&conv_y).is_empty()).await;

    // Let X's delayed response arrive — it must be dropped.
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert_eq!(client.active_conversation(), Some(conv_y.clone()));
    assert_eq!(client.messages_for(&conv_y).len(), 1);
    assert_eq!(client.messages_for(&conv_y)[0].text, "from y");
    assert!(
        client.messages_for(&conv_x).is_empty(),
        "superseded sync for x must not be applied"
    );
}

#[tokio::test(start_paused = true)]
async fn uncontested_slow_sync_still_applies() {
    let (client, backend) = make_client();
    let conv_x = ConversationId::new("x");

    backend.seed_messages(&conv_x, vec![raw_message("mx", "x", "from x", 100)]);
    backend.delay_messages_fetch(&conv_x, Duration::from_millis(500));

    client.select_conversation(conv_x.clone());

    wait_until(|| !client.messages_for(&conv_x).is_empty()).await;
    assert_eq!(client.messages_for(&conv_x)[0].text, "from x");
}

#[tokio::test(start_paused = true)]
async fn reselecting_same_conversation_applies_latest_sync() {
    let (client, backend) = make_client();
    let conv = ConversationId::new("x");
    backend.seed_messages(&conv, vec![raw_message("m1", "x", "hello", 100)]);

    // Two selections in quick succession: the first sync's epoch is
    // superseded, but the second sync covers the same conversation, so
    // the data still arrives.
    client.select_conversation(conv.clone());
    client.select_conversation(conv.clone());

    wait_until(|| !client.messages_for(&conv).is_empty()).await;
    assert_eq!(client.messages_for(&conv).len(), 1);
}
