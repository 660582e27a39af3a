//! Reliability outbox: at-least-once delivery for outbound messages.
//!
//! Every accepted message is attempted until acknowledged, retried out,
//! or evicted as stale. Retries may duplicate on the wire — the temp ID
//! makes the server side idempotent and the store dedupes on read, so
//! duplication is tolerated rather than prevented.
//!
//! Processing is tick-driven rather than per-event: a send tick drains a
//! bounded batch into in-flight attempts, a retry tick promotes entries
//! whose backoff has elapsed, and a sweep tick evicts entries older than
//! the maximum queue age. All three tasks are spawned together and stop
//! together through one [`OutboxHandle`].
//!
//! Per-message state machine:
//! `queued -> sending -> {acknowledged | retry-scheduled -> queued | failed}`.
//!
//! An ack timeout is AMBIGUOUS, not a failure: the message is
//! optimistically marked `Sent` and leaves the queue. That trades a
//! possible false "sent" for never showing a false failure; the policy is
//! logged loudly every time it fires.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use webchat_proto::message::{
    ConversationId, MessageId, MessageKey, MessageStatus, TempId, Timestamp, UserId,
};
use webchat_proto::wire::ClientFrame;

use crate::config::OutboxConfig;
use crate::events::{ClientEvent, EventBus};
use crate::rest::Backend;
use crate::store::MessageStore;
use crate::transport::{Transport, TransportError};

/// Send priority. Entries drain priority-descending, FIFO within a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendPriority {
    /// Drained before everything else.
    High,
    /// The default.
    #[default]
    Normal,
    /// Drained last.
    Low,
}

impl SendPriority {
    /// Numeric rank, higher drains first.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::High => 2,
            Self::Normal => 1,
            Self::Low => 0,
        }
    }
}

/// Per-message options for [`Outbox::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Queue priority.
    pub priority: SendPriority,
    /// Ack wait override; `None` uses the configured default.
    pub ack_timeout: Option<Duration>,
}

/// The outbound payload handed to the queue. The text is wire-ready
/// (already encrypted if a cipher is in use).
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Correlation ID; also the store key of the optimistic record.
    pub temp_id: TempId,
    /// Target conversation.
    pub conversation_id: ConversationId,
    /// The partner, when known, for the HTTP fallback contract.
    pub receiver_id: Option<UserId>,
    /// Wire-ready message body.
    pub text: String,
    /// Client-side creation time.
    pub timestamp: Timestamp,
}

/// A queued message plus its delivery bookkeeping. Exists only until
/// acknowledged, terminally failed, or evicted.
#[derive(Debug)]
struct QueuedMessage {
    outbound: OutboundMessage,
    priority: SendPriority,
    ack_timeout: Duration,
    attempts: u32,
    queued_at: Instant,
    last_attempt: Option<Instant>,
    retry_at: Option<Instant>,
    last_error: Option<String>,
}

/// Outcome of one delivery attempt.
enum AttemptOutcome {
    /// The server acknowledged and assigned a stable ID.
    Confirmed(MessageId),
    /// No decisive answer — the send may or may not have landed.
    Ambiguous,
    /// Explicit failure with a reason.
    Failed(String),
}

/// Cancellation handle for the outbox tick tasks. Dropping it (or calling
/// [`shutdown`](Self::shutdown)) stops all of them together.
pub struct OutboxHandle {
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl OutboxHandle {
    /// Abort all tick tasks. Idempotent.
    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for OutboxHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The reliability queue.
///
/// Owns the outbound lifecycle; updates the shared [`MessageStore`] in
/// place as sends resolve and reports through the shared [`EventBus`].
pub struct Outbox<T: Transport, B: Backend> {
    config: OutboxConfig,
    transport: Arc<T>,
    backend: Arc<B>,
    store: Arc<Mutex<MessageStore>>,
    events: Arc<EventBus>,
    /// Set by the orchestrator once the socket session is authenticated;
    /// gates the socket path.
    authenticated: Arc<AtomicBool>,
    /// Entries waiting for a send slot.
    pending: Mutex<Vec<QueuedMessage>>,
    /// Entries waiting out a retry backoff.
    retries: Mutex<Vec<QueuedMessage>>,
    /// Number of attempts currently on the wire.
    in_flight: AtomicUsize,
}

impl<T: Transport + 'static, B: Backend + 'static> Outbox<T, B> {
    /// Create an outbox over the given delivery paths and shared state.
    pub fn new(
        config: OutboxConfig,
        transport: Arc<T>,
        backend: Arc<B>,
        store: Arc<Mutex<MessageStore>>,
        events: Arc<EventBus>,
        authenticated: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            transport,
            backend,
            store,
            events,
            authenticated,
            pending: Mutex::new(Vec::new()),
            retries: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Accept a message for delivery. Non-blocking; the next send tick
    /// picks it up.
    pub fn enqueue(&self, outbound: OutboundMessage, options: SendOptions) {
        let entry = QueuedMessage {
            outbound,
            priority: options.priority,
            ack_timeout: options.ack_timeout.unwrap_or(self.config.ack_timeout),
            attempts: 0,
            queued_at: Instant::now(),
            last_attempt: None,
            retry_at: None,
            last_error: None,
        };
        tracing::debug!(
            temp_id = %entry.outbound.temp_id,
            priority = ?entry.priority,
            "message enqueued"
        );
        self.pending.lock().push(entry);
    }

    /// Spawn the send, retry, and sweep tick tasks. The returned handle
    /// is the single cancellation point for all of them.
    pub fn spawn_ticks(self: &Arc<Self>) -> OutboxHandle {
        let mut handles = Vec::with_capacity(3);

        let outbox = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(outbox.config.send_interval);
            loop {
                tick.tick().await;
                outbox.process_send_queue();
            }
        }));

        let outbox = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(outbox.config.retry_interval);
            loop {
                tick.tick().await;
                outbox.promote_due_retries();
            }
        }));

        let outbox = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(outbox.config.sweep_interval);
            loop {
                tick.tick().await;
                outbox.sweep_stale();
            }
        }));

        OutboxHandle { handles }
    }

    /// Promote every backoff entry immediately. Called when connectivity
    /// is restored so queued messages do not wait out a stale backoff.
    pub fn flush_now(&self) {
        let mut retries = self.retries.lock();
        if retries.is_empty() {
            return;
        }
        let mut pending = self.pending.lock();
        tracing::info!(count = retries.len(), "flushing retry queue after reconnect");
        pending.append(&mut retries);
    }

    /// Entries waiting for a send slot.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Entries waiting out a retry backoff.
    pub fn retrying_count(&self) -> usize {
        self.retries.lock().len()
    }

    /// Attempts currently on the wire.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Drain up to the batch budget from the pending queue into in-flight
    /// attempt tasks. Ordering: priority descending, enqueue time
    /// ascending within a band.
    fn process_send_queue(self: &Arc<Self>) {
        let batch = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return;
            }
            pending.sort_by(|a, b| {
                b.priority
                    .rank()
                    .cmp(&a.priority.rank())
                    .then(a.queued_at.cmp(&b.queued_at))
            });
            let budget = self
                .config
                .send_batch
                .saturating_sub(self.in_flight.load(Ordering::Relaxed));
            let take = budget.min(pending.len());
            pending.drain(..take).collect::<Vec<_>>()
        };

        for entry in batch {
            self.in_flight.fetch_add(1, Ordering::Relaxed);
            let outbox = Arc::clone(self);
            tokio::spawn(async move {
                outbox.attempt(entry).await;
                outbox.in_flight.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }

    /// Run one delivery attempt and route its outcome.
    async fn attempt(&self, mut entry: QueuedMessage) {
        entry.attempts += 1;
        entry.last_attempt = Some(Instant::now());

        let via_socket =
            self.transport.is_connected() && self.authenticated.load(Ordering::Relaxed);

        let outcome = if via_socket {
            self.attempt_socket(&entry).await
        } else {
            self.attempt_http(&entry).await
        };

        match outcome {
            AttemptOutcome::Confirmed(message_id) => self.complete(&entry, message_id),
            AttemptOutcome::Ambiguous => self.complete_unconfirmed(&entry),
            AttemptOutcome::Failed(reason) => self.schedule_retry_or_fail(entry, reason),
        }
    }

    /// Deliver over the socket, waiting for the ack.
    async fn attempt_socket(&self, entry: &QueuedMessage) -> AttemptOutcome {
        let frame = ClientFrame::SendMessage {
            temp_id: entry.outbound.temp_id,
            conversation_id: entry.outbound.conversation_id.clone(),
            text: entry.outbound.text.clone(),
            timestamp: entry.outbound.timestamp,
        };

        if self.config.redundant_post {
            // Redundant POST alongside the socket emit; idempotent temp
            // IDs let the server collapse the duplicate.
            let backend = Arc::clone(&self.backend);
            let outbound = entry.outbound.clone();
            tokio::spawn(async move {
                if let Err(e) = backend
                    .post_message(
                        &outbound.conversation_id,
                        outbound.receiver_id.as_ref(),
                        &outbound.text,
                        &outbound.temp_id,
                    )
                    .await
                {
                    tracing::debug!(temp_id = %outbound.temp_id, err = %e, "redundant post failed");
                }
            });
        }

        match self.transport.emit_with_ack(frame, entry.ack_timeout).await {
            Ok(ack) if ack.success => match ack.message_id {
                Some(id) => AttemptOutcome::Confirmed(id),
                None => {
                    tracing::warn!(
                        temp_id = %entry.outbound.temp_id,
                        "success ack without message id, treating as unconfirmed"
                    );
                    AttemptOutcome::Ambiguous
                }
            },
            Ok(ack) => AttemptOutcome::Failed(
                ack.error.unwrap_or_else(|| "send rejected by server".into()),
            ),
            Err(TransportError::Timeout) => AttemptOutcome::Ambiguous,
            Err(e) => AttemptOutcome::Failed(e.to_string()),
        }
    }

    /// Deliver over the HTTP fallback.
    async fn attempt_http(&self, entry: &QueuedMessage) -> AttemptOutcome {
        match self
            .backend
            .post_message(
                &entry.outbound.conversation_id,
                entry.outbound.receiver_id.as_ref(),
                &entry.outbound.text,
                &entry.outbound.temp_id,
            )
            .await
        {
            Ok(raw) => match raw.id {
                Some(id) => AttemptOutcome::Confirmed(MessageId::new(id)),
                None => {
                    tracing::warn!(
                        temp_id = %entry.outbound.temp_id,
                        "post response without id, treating as unconfirmed"
                    );
                    AttemptOutcome::Ambiguous
                }
            },
            Err(e) => AttemptOutcome::Failed(e.to_string()),
        }
    }

    /// The server confirmed: re-key the store record and report.
    fn complete(&self, entry: &QueuedMessage, message_id: MessageId) {
        let temp_id = entry.outbound.temp_id;
        tracing::info!(
            temp_id = %temp_id,
            message_id = %message_id,
            attempts = entry.attempts,
            "message delivered"
        );

        let updated = self.store.lock().confirm(&temp_id, message_id);
        match updated {
            Some(message) => self.events.emit(&ClientEvent::MessageUpdated { message }),
            None => {
                tracing::debug!(temp_id = %temp_id, "ack for record no longer pending");
            }
        }
    }

    /// No decisive ack: optimistically mark the record `Sent` and drop
    /// the entry from the queue. Ambiguity resolves toward success; a
    /// late ack can still reconcile the record through the orchestrator.
    fn complete_unconfirmed(&self, entry: &QueuedMessage) {
        let temp_id = entry.outbound.temp_id;
        tracing::warn!(
            temp_id = %temp_id,
            attempts = entry.attempts,
            "no acknowledgment before timeout, optimistically marking sent"
        );

        let key = MessageKey::Pending(temp_id);
        let updated = self
            .store
            .lock()
            .advance_status(&key, &MessageStatus::Sent);
        if let Some(message) = updated {
            self.events.emit(&ClientEvent::MessageUpdated { message });
        }
    }

    /// Explicit failure: schedule a backoff retry, or fail terminally
    /// once attempts are exhausted.
    fn schedule_retry_or_fail(&self, mut entry: QueuedMessage, reason: String) {
        let temp_id = entry.outbound.temp_id;
        entry.last_error = Some(reason.clone());

        if entry.attempts >= self.config.max_retries {
            tracing::warn!(
                temp_id = %temp_id,
                attempts = entry.attempts,
                reason = %reason,
                "retries exhausted, message failed"
            );
            let key = MessageKey::Pending(temp_id);
            let updated = self
                .store
                .lock()
                .set_status(&key, MessageStatus::Failed(reason.clone()));
            self.events.emit(&ClientEvent::MessageFailed {
                key: key.clone(),
                reason,
            });
            if let Some(message) = updated {
                self.events.emit(&ClientEvent::MessageUpdated { message });
            }
            return;
        }

        let delay = retry_delay(&self.config, entry.attempts);
        entry.retry_at = Some(entry.queued_at + delay);
        tracing::debug!(
            temp_id = %temp_id,
            attempt = entry.attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            reason = %reason,
            "send failed, retry scheduled"
        );
        self.retries.lock().push(entry);
    }

    /// Move entries whose backoff has elapsed back into the send queue.
    fn promote_due_retries(&self) {
        let now = Instant::now();
        let mut retries = self.retries.lock();
        if retries.is_empty() {
            return;
        }
        let mut pending = self.pending.lock();

        let mut i = 0;
        while i < retries.len() {
            if retries[i].retry_at.is_some_and(|at| at <= now) {
                pending.push(retries.swap_remove(i));
            } else {
                i += 1;
            }
        }
    }

    /// Evict entries older than the maximum queue age, reporting each as
    /// abandoned. Bounds queue growth across long offline periods.
    fn sweep_stale(&self) {
        let now = Instant::now();
        let max_age = self.config.max_age;
        let mut evicted = Vec::new();

        {
            let mut retries = self.retries.lock();
            let mut pending = self.pending.lock();
            for queue in [&mut *retries, &mut *pending] {
                let mut i = 0;
                while i < queue.len() {
                    if now.duration_since(queue[i].queued_at) > max_age {
                        evicted.push(queue.swap_remove(i));
                    } else {
                        i += 1;
                    }
                }
            }
        }

        for entry in evicted {
            let temp_id = entry.outbound.temp_id;
            tracing::warn!(
                temp_id = %temp_id,
                age_secs = now.duration_since(entry.queued_at).as_secs(),
                attempts = entry.attempts,
                "stale queue entry abandoned"
            );
            let key = MessageKey::Pending(temp_id);
            let updated = self.store.lock().set_status(
                &key,
                MessageStatus::Failed("abandoned after exceeding maximum queue age".into()),
            );
            self.events.emit(&ClientEvent::MessageAbandoned { key: key.clone() });
            if let Some(message) = updated {
                self.events.emit(&ClientEvent::MessageUpdated { message });
            }
        }
    }
}

/// Backoff delay for the next retry after `attempts` completed attempts.
///
/// `min(base x factor^(attempts-1) + jitter, max_delay)`, with additive
/// jitter of up to `jitter` x base.
pub(crate) fn retry_delay(config: &OutboxConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(30);
    let raw = config
        .base_delay
        .mul_f64(config.backoff_factor.powi(i32::try_from(exponent).unwrap_or(30)));
    let jitter = config.base_delay.mul_f64(config.jitter * rand::random::<f64>());
    (raw + jitter).min(config.max_delay)
}
