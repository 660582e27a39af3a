// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items,
    clippy::significant_drop_tightening,
    clippy::cast_possible_truncation
)]

//! Retry, backoff, terminal failure, stale eviction, and manual retry,
//! driven through the full client on a paused clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use webchat::client::ChatClient;
use webchat::config::{ClientConfig, OutboxConfig};
use webchat::crypto::NoopCipher;
use webchat::events::ClientEvent;
use webchat::rest::{InMemoryBackend, StaticToken};
use webchat::transport::loopback::{LoopbackServer, LoopbackTransport};
use webchat_proto::message::{ConversationId, MessageStatus, UserId};

type TestClient = ChatClient<NoopCipher, LoopbackTransport, Arc<InMemoryBackend>>;

struct Fixture {
    client: Arc<TestClient>,
    server: Arc<LoopbackServer>,
    backend: Arc<InMemoryBackend>,
}

/// Client over a severed loopback link: every delivery goes through the
/// HTTP fallback, which the tests control.
async fn make_offline_fixture(outbox: OutboxConfig) -> Fixture {
    let config = ClientConfig {
        outbox,
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
    client.start();
    server.sever().await;

    Fixture {
        client,
        server,
        backend,
    }
}

async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..600 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached before deadline");
}

#[tokio::test(start_paused = true)]
async fn always_failing_send_is_attempted_exactly_max_retries_times() {
    let fx = make_offline_fixture(OutboxConfig {
        max_retries: 5,
        base_delay: Duration::from_millis(100),
        backoff_factor: 2.0,
        max_delay: Duration::from_secs(60),
        jitter: 0.0,
        send_interval: Duration::from_millis(10),
        retry_interval: Duration::from_millis(10),
        ..OutboxConfig::default()
    })
    .await;
    fx.backend.set_fail_posts(true);

    let failed_reason = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&failed_reason);
    fx.client.events().on(move |event| {
        if let ClientEvent::MessageFailed { reason, .. } = event {
            *sink.lock() = Some(reason.clone());
        }
    });

    let conv = ConversationId::new("c1");
    let message = fx.client.send_message("doomed", Some(conv.clone())).unwrap();

    wait_until(|| failed_reason.lock().is_some()).await;

    // Exactly max_retries delivery attempts, then terminal failure.
    let attempts = fx.backend.posted();
    assert_eq!(attempts.len(), 5);

    let stored = fx.client.message(&message.key).unwrap();
    assert!(matches!(stored.status, MessageStatus::Failed(_)));

    // Each inter-attempt delay is anchored at the enqueue time and grows
    // exponentially: 100ms, 200ms, 400ms, 800ms after the first attempt.
    let first = attempts[0].at;
    let expected_ms = [0u64, 100, 200, 400, 800];
    for (attempt, expected) in attempts.iter().zip(expected_ms) {
        let elapsed = attempt.at.duration_since(first).as_millis() as u64;
        assert!(
            elapsed >= expected.saturating_sub(30) && elapsed <= expected + 60,
            "attempt at {elapsed}ms, expected about {expected}ms"
        );
    }
    // Monotonic non-decreasing gaps.
    for pair in attempts.windows(2) {
        assert!(pair[1].at >= pair[0].at);
    }

    // No further attempts happen on their own.
    let count_before = fx.backend.posted().len();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(fx.backend.posted().len(), count_before);

    fx.client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn stale_entry_is_evicted_and_reported_abandoned() {
    // Huge retry budget and delays: the entry sits in the retry queue
    // until the sweep evicts it at the 5 minute age limit.
    let fx = make_offline_fixture(OutboxConfig {
        max_retries: 1000,
        base_delay: Duration::from_secs(60),
        jitter: 0.0,
        send_interval: Duration::from_millis(10),
        retry_interval: Duration::from_millis(50),
        sweep_interval: Duration::from_millis(100),
        ..OutboxConfig::default()
    })
    .await;
    fx.backend.set_fail_posts(true);

    let abandoned = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&abandoned);
    fx.client.events().on(move |event| {
        if matches!(event, ClientEvent::MessageAbandoned { .. }) {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let conv = ConversationId::new("c1");
    let message = fx.client.send_message("stale", Some(conv.clone())).unwrap();

    // Let the first attempt fail, then age the entry past the limit.
    wait_until(|| !fx.backend.posted().is_empty()).await;
    tokio::time::advance(Duration::from_secs(6 * 60)).await;
    wait_until(|| abandoned.load(Ordering::SeqCst)).await;

    let stored = fx.client.message(&message.key).unwrap();
    let MessageStatus::Failed(reason) = stored.status else {
        panic!("expected Failed status, got {:?}", stored.status);
    };
    assert!(reason.contains("abandoned"));

    fx.client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn manual_retry_resets_the_cycle_and_can_succeed() {
    let fx = make_offline_fixture(OutboxConfig {
        max_retries: 1,
        base_delay: Duration::from_millis(50),
        jitter: 0.0,
        send_interval: Duration::from_millis(10),
        retry_interval: Duration::from_millis(10),
        ..OutboxConfig::default()
    })
    .await;
    fx.backend.set_fail_posts(true);

    let conv = ConversationId::new("c1");
    let message = fx.client.send_message("try again", Some(conv.clone())).unwrap();
    let key = message.key.clone();

    // One attempt, then terminal failure.
    wait_until(|| {
        fx.client
            .message(&key)
            .is_some_and(|m| matches!(m.status, MessageStatus::Failed(_)))
    })
    .await;
    assert_eq!(fx.backend.posted().len(), 1);

    // The backend recovers; the user retries manually.
    fx.backend.set_fail_posts(false);
    let retried = fx.client.retry_message(&key).unwrap();
    assert_eq!(retried.status, MessageStatus::Sending);

    // The retry preserves the temp id and ends Sent under a server key.
    wait_until(|| {
        fx.client
            .messages_for(&conv)
            .iter()
            .any(|m| m.status == MessageStatus::Sent)
    })
    .await;
    assert_eq!(fx.backend.posted().len(), 2);
    assert_eq!(
        fx.backend.posted()[0].temp_id,
        fx.backend.posted()[1].temp_id
    );
    assert!(fx.client.message(&key).is_none(), "pending key was re-keyed");
    assert_eq!(fx.client.messages_for(&conv).len(), 1);

    fx.client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn failed_message_stays_terminal_without_manual_retry() {
    let fx = make_offline_fixture(OutboxConfig {
        max_retries: 2,
        base_delay: Duration::from_millis(20),
        jitter: 0.0,
        send_interval: Duration::from_millis(10),
        retry_interval: Duration::from_millis(10),
        ..OutboxConfig::default()
    })
    .await;
    fx.backend.set_fail_posts(true);

    let conv = ConversationId::new("c1");
    let message = fx.client.send_message("terminal", Some(conv)).unwrap();

    wait_until(|| {
        fx.client
            .message(&message.key)
            .is_some_and(|m| matches!(m.status, MessageStatus::Failed(_)))
    })
    .await;
    assert_eq!(fx.backend.posted().len(), 2);

    // Even with the backend healthy again, nothing moves automatically.
    fx.backend.set_fail_posts(false);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fx.backend.posted().len(), 2);
    assert!(matches!(
        fx.client.message(&message.key).unwrap().status,
        MessageStatus::Failed(_)
    ));

    fx.client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn queue_survives_server_restored_mid_backoff() {
    let fx = make_offline_fixture(OutboxConfig {
        max_retries: 50,
        base_delay: Duration::from_millis(100),
        jitter: 0.0,
        send_interval: Duration::from_millis(10),
        retry_interval: Duration::from_millis(10),
        ..OutboxConfig::default()
    })
    .await;
    fx.backend.set_fail_posts(true);

    let conv = ConversationId::new("c1");
    fx.client.send_message("patient", Some(conv.clone())).unwrap();
    wait_until(|| !fx.backend.posted().is_empty()).await;

    // Backend comes back while the entry waits out a backoff.
    fx.backend.set_fail_posts(false);
    let _ = &fx.server; // socket stays severed; HTTP alone must deliver

    wait_until(|| {
        fx.client
            .messages_for(&conv)
            .iter()
            .any(|m| m.status == MessageStatus::Sent)
    })
    .await;

    fx.client.shutdown();
}
