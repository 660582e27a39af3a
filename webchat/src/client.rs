//! The chat client orchestrator.
//!
//! [`ChatClient`] composes the transport, the reliability outbox, the
//! message store, and the conversation directory into one state machine.
//! It is the single long-lived service object of the messaging core:
//! constructed once at session start, injected into presentation
//! consumers, never looked up through globals.
//!
//! Three independent state enums cover the machine: connection (driven by
//! transport events), auth (driven by the authenticate exchange), and
//! sync (driven by REST pulls). Presentation layers observe everything
//! through the typed [`EventBus`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use webchat_proto::conversation::Conversation;
use webchat_proto::message::{
    ConversationId, Message, MessageKey, MessageStatus, TempId, Timestamp, UserId, ValidationError,
    validate_text,
};
use webchat_proto::normalize::RawMessage;
use webchat_proto::wire::{ClientFrame, SendAck, ServerFrame};

use crate::config::ClientConfig;
use crate::crypto::{Cipher, decrypt_or_passthrough, encrypt_or_passthrough};
use crate::events::{ClientEvent, EventBus};
use crate::outbox::{Outbox, OutboxHandle, OutboundMessage, SendOptions};
use crate::rest::{Backend, TokenProvider};
use crate::store::{ConversationDirectory, MessageStore};
use crate::transport::{Transport, TransportEvent};

/// Connection state of the real-time channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection, and none being attempted.
    Disconnected,
    /// Initial connection in progress.
    Connecting,
    /// Live connection.
    Connected,
    /// Connection lost; automatic reconnection in progress.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Authentication state of the socket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Not authenticated.
    Unauthenticated,
    /// Credentials presented, awaiting the server's verdict.
    Authenticating,
    /// Session accepted.
    Authenticated,
}

/// State of the REST synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing in flight.
    Idle,
    /// A sync is running.
    Syncing,
    /// The last sync failed; cached data remains visible.
    Error,
}

/// Errors returned by the send and retry operations.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The message text failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No target conversation was given and none is active.
    #[error("no conversation selected")]
    NoConversation,

    /// The referenced message does not exist.
    #[error("message not found")]
    UnknownMessage,

    /// The message is not in a retryable state.
    #[error("message is not retryable: {0}")]
    NotRetryable(&'static str),
}

/// Mutable orchestrator state behind one lock.
struct ClientState {
    connection: ConnectionState,
    auth: AuthState,
    sync: SyncState,
    /// The conversation currently shown by the presentation layer.
    active: Option<ConversationId>,
    /// Bumped on every conversation selection; a sync response is only
    /// applied if the epoch it was started under is still current.
    sync_epoch: u64,
    /// Whether the first full sync has been triggered.
    synced_once: bool,
    /// Remote typing indicators and when they expire.
    typing: HashMap<(ConversationId, UserId), Instant>,
}

/// The messaging core's orchestrator.
///
/// Generic over the collaborator seams: the encryption capability, the
/// transport, and the REST backend. Construct once, wrap in an [`Arc`],
/// call [`start`](Self::start), and subscribe to [`events`](Self::events).
pub struct ChatClient<C: Cipher, T: Transport, B: Backend> {
    user_id: UserId,
    user_name: String,
    cipher: Arc<C>,
    transport: Arc<T>,
    backend: Arc<B>,
    tokens: Arc<dyn TokenProvider>,
    store: Arc<Mutex<MessageStore>>,
    directory: Arc<Mutex<ConversationDirectory>>,
    events: Arc<EventBus>,
    outbox: Arc<Outbox<T, B>>,
    /// Gates the outbox's socket path; set on `authenticated`, cleared on
    /// any disconnect.
    authenticated: Arc<AtomicBool>,
    state: Mutex<ClientState>,
    typing_expiry: Duration,
    /// Background tasks (event pump, typing sweep).
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    /// Cancellation handle for the outbox tick tasks.
    outbox_handle: Mutex<Option<OutboxHandle>>,
}

impl<C, T, B> ChatClient<C, T, B>
where
    C: Cipher + 'static,
    T: Transport + 'static,
    B: Backend + 'static,
{
    /// Create a client over the given collaborators. Call
    /// [`start`](Self::start) to begin processing transport events.
    pub fn new(
        config: &ClientConfig,
        user_id: UserId,
        user_name: impl Into<String>,
        cipher: C,
        transport: T,
        backend: B,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let transport = Arc::new(transport);
        let backend = Arc::new(backend);
        let store = Arc::new(Mutex::new(MessageStore::new()));
        let events = Arc::new(EventBus::new());
        let authenticated = Arc::new(AtomicBool::new(false));

        let outbox = Arc::new(Outbox::new(
            config.outbox.clone(),
            Arc::clone(&transport),
            Arc::clone(&backend),
            Arc::clone(&store),
            Arc::clone(&events),
            Arc::clone(&authenticated),
        ));

        Self {
            user_id,
            user_name: user_name.into(),
            cipher: Arc::new(cipher),
            transport,
            backend,
            tokens,
            store,
            directory: Arc::new(Mutex::new(ConversationDirectory::new())),
            events,
            outbox,
            authenticated,
            state: Mutex::new(ClientState {
                connection: ConnectionState::Connecting,
                auth: AuthState::Unauthenticated,
                sync: SyncState::Idle,
                active: None,
                sync_epoch: 0,
                synced_once: false,
                typing: HashMap::new(),
            }),
            typing_expiry: config.typing_expiry,
            tasks: Mutex::new(Vec::new()),
            outbox_handle: Mutex::new(None),
        }
    }

    /// Spawn the event pump, the typing sweep, and the outbox ticks.
    /// Calling twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            this.event_pump().await;
        }));

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                this.sweep_typing();
            }
        }));

        *self.outbox_handle.lock() = Some(self.outbox.spawn_ticks());
    }

    /// Stop every background task through their cancellation handles.
    /// Idempotent; call when the session ends to avoid timer leaks.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(handle) = self.outbox_handle.lock().take() {
            handle.shutdown();
        }
    }

    /// The typed event surface for presentation layers.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    /// Current auth state.
    pub fn auth_state(&self) -> AuthState {
        self.state.lock().auth
    }

    /// Current sync state.
    pub fn sync_state(&self) -> SyncState {
        self.state.lock().sync
    }

    /// The currently active conversation, if any.
    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.state.lock().active.clone()
    }

    /// Messages for a conversation, ascending by timestamp.
    pub fn messages_for(&self, conversation: &ConversationId) -> Vec<Message> {
        self.store.lock().messages_for(conversation)
    }

    /// A single message record by key.
    pub fn message(&self, key: &MessageKey) -> Option<Message> {
        self.store.lock().get(key).cloned()
    }

    /// All conversations, most recent activity first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.directory.lock().ordered()
    }

    /// Remote users currently typing in a conversation.
    pub fn typing_users(&self, conversation: &ConversationId) -> Vec<UserId> {
        let now = Instant::now();
        self.state
            .lock()
            .typing
            .iter()
            .filter(|((conv, _), expiry)| conv == conversation && **expiry > now)
            .map(|((_, user), _)| user.clone())
            .collect()
    }

    /// Send a message to the given conversation (or the active one).
    ///
    /// Builds an optimistic record with status `Sending`, inserts it into
    /// the store, emits `MessageUpdated` synchronously so the UI shows it
    /// immediately, then hands delivery to the outbox. Returns the
    /// optimistic record so callers can track it.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Validation`] for empty or oversized text and
    /// [`SendError::NoConversation`] when no target can be resolved.
    pub fn send_message(
        &self,
        text: &str,
        conversation: Option<ConversationId>,
    ) -> Result<Message, SendError> {
        let trimmed = validate_text(text)?;
        let conversation = conversation
            .or_else(|| self.active_conversation())
            .ok_or(SendError::NoConversation)?;

        let temp_id = TempId::new();
        let message = Message {
            key: MessageKey::Pending(temp_id),
            conversation_id: conversation.clone(),
            sender_id: self.user_id.clone(),
            sender_name: self.user_name.clone(),
            text: trimmed.to_string(),
            timestamp: Timestamp::now(),
            status: MessageStatus::Sending,
        };

        let active = self.active_conversation();
        self.store.lock().upsert(message.clone());
        self.directory
            .lock()
            .record_message(&message, false, active.as_ref());
        self.events.emit(&ClientEvent::MessageUpdated {
            message: message.clone(),
        });
        self.events.emit(&ClientEvent::ConversationsUpdated);

        let wire_text = encrypt_or_passthrough(&*self.cipher, trimmed, &conversation);
        let receiver_id = self.directory.lock().partner_of(&conversation);
        self.outbox.enqueue(
            OutboundMessage {
                temp_id,
                conversation_id: conversation,
                receiver_id,
                text: wire_text,
                timestamp: message.timestamp,
            },
            SendOptions::default(),
        );

        Ok(message)
    }

    /// Manually retry a terminally failed message.
    ///
    /// Resets the record to `Sending` and requeues it with a fresh
    /// attempt budget; the temp ID is preserved so the server can
    /// deduplicate against any earlier ambiguous attempt.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::UnknownMessage`] for an unknown key and
    /// [`SendError::NotRetryable`] for records that are confirmed or not
    /// failed.
    pub fn retry_message(&self, key: &MessageKey) -> Result<Message, SendError> {
        let message = self
            .store
            .lock()
            .get(key)
            .cloned()
            .ok_or(SendError::UnknownMessage)?;

        let MessageKey::Pending(temp_id) = key else {
            return Err(SendError::NotRetryable("message is already confirmed"));
        };
        if !matches!(message.status, MessageStatus::Failed(_)) {
            return Err(SendError::NotRetryable("only failed messages can be retried"));
        }

        let updated = self
            .store
            .lock()
            .set_status(key, MessageStatus::Sending)
            .ok_or(SendError::UnknownMessage)?;
        self.events.emit(&ClientEvent::MessageUpdated {
            message: updated.clone(),
        });

        let wire_text =
            encrypt_or_passthrough(&*self.cipher, &message.text, &message.conversation_id);
        let receiver_id = self.directory.lock().partner_of(&message.conversation_id);
        self.outbox.enqueue(
            OutboundMessage {
                temp_id: *temp_id,
                conversation_id: message.conversation_id.clone(),
                receiver_id,
                text: wire_text,
                timestamp: message.timestamp,
            },
            SendOptions::default(),
        );

        Ok(updated)
    }

    /// Make a conversation the active one.
    ///
    /// Resets its unread count, emits `ConversationChanged`, joins the
    /// server-side room when connected, and triggers a message sync
    /// guarded against stale responses: if another selection happens
    /// before the response arrives, the response is discarded.
    pub fn select_conversation(self: &Arc<Self>, id: ConversationId) {
        let epoch = {
            let mut state = self.state.lock();
            state.active = Some(id.clone());
            state.sync_epoch += 1;
            state.sync_epoch
        };

        if self.directory.lock().reset_unread(&id) {
            self.events.emit(&ClientEvent::ConversationsUpdated);
        }
        self.events.emit(&ClientEvent::ConversationChanged { id: id.clone() });

        if self.transport.is_connected() {
            let transport = Arc::clone(&self.transport);
            let room = id.clone();
            tokio::spawn(async move {
                if let Err(e) = transport
                    .emit(ClientFrame::JoinRoom {
                        conversation_id: room.clone(),
                    })
                    .await
                {
                    tracing::debug!(conversation = %room, err = %e, "join room failed");
                }
            });
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.sync_messages_epoch(&id, epoch).await;
        });
    }

    /// Pull the authoritative conversation list and merge it into the
    /// directory.
    pub async fn sync_conversations(&self) {
        self.set_sync(SyncState::Syncing);
        match self.backend.fetch_conversations().await {
            Ok(raws) => {
                let now = Timestamp::now();
                {
                    let mut directory = self.directory.lock();
                    for raw in &raws {
                        let mut conversation = raw.normalize(now);
                        if let Some(last) = conversation.last_message.as_mut() {
                            last.text = decrypt_or_passthrough(
                                &*self.cipher,
                                &last.text,
                                &conversation.id,
                            );
                        }
                        directory.upsert(conversation);
                    }
                }
                tracing::debug!(count = raws.len(), "conversation sync complete");
                self.set_sync(SyncState::Idle);
                self.events.emit(&ClientEvent::ConversationsUpdated);
            }
            Err(e) => {
                tracing::warn!(err = %e, "conversation sync failed, keeping cached data");
                self.set_sync(SyncState::Error);
            }
        }
    }

    /// Pull the authoritative messages for a conversation and merge them
    /// into the store (upsert by id — never duplicate).
    pub async fn sync_messages(&self, conversation: &ConversationId) {
        let epoch = self.state.lock().sync_epoch;
        self.sync_messages_epoch(conversation, epoch).await;
    }

    /// Notify the server of the local user's typing state. Best-effort;
    /// failures are logged and dropped.
    pub async fn set_typing(&self, conversation: &ConversationId, typing: bool) {
        if !self.transport.is_connected() {
            return;
        }
        let frame = if typing {
            ClientFrame::TypingStart {
                conversation_id: conversation.clone(),
            }
        } else {
            ClientFrame::TypingStop {
                conversation_id: conversation.clone(),
            }
        };
        if let Err(e) = self.transport.emit(frame).await {
            tracing::debug!(conversation = %conversation, err = %e, "typing notify failed");
        }
    }

    /// Clear local history for a conversation — the only message deletion
    /// path.
    pub fn clear_history(&self, conversation: &ConversationId) {
        let removed = self.store.lock().clear_conversation(conversation);
        tracing::info!(conversation = %conversation, removed, "local history cleared");
        self.events.emit(&ClientEvent::HistoryCleared {
            conversation_id: conversation.clone(),
        });
    }

    // -- internals ---------------------------------------------------------

    /// Drive the state machine from transport events until the transport
    /// closes.
    async fn event_pump(self: &Arc<Self>) {
        loop {
            match self.transport.next_event().await {
                Ok(event) => self.handle_transport_event(event).await,
                Err(e) => {
                    tracing::warn!(err = %e, "transport event stream ended");
                    break;
                }
            }
        }
    }

    async fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.set_connection(ConnectionState::Connected);
                self.begin_authentication().await;
            }
            TransportEvent::Disconnected { reason } => {
                tracing::debug!(reason = %reason, "connection dropped");
                self.authenticated.store(false, Ordering::Relaxed);
                self.set_auth(AuthState::Unauthenticated);
                self.set_connection(ConnectionState::Disconnected);
            }
            TransportEvent::Reconnecting { attempt, delay } => {
                tracing::debug!(attempt, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "reconnecting");
                self.set_connection(ConnectionState::Reconnecting);
            }
            TransportEvent::ConnectionFailed => {
                tracing::error!("reconnect attempts exhausted; staying offline");
                self.authenticated.store(false, Ordering::Relaxed);
                self.set_auth(AuthState::Unauthenticated);
                self.set_connection(ConnectionState::Disconnected);
            }
            TransportEvent::Frame(frame) => self.handle_server_frame(frame).await,
        }
    }

    /// Present the bearer token as soon as the socket is up.
    async fn begin_authentication(&self) {
        let Some(token) = self.tokens.token() else {
            tracing::warn!("no auth token available, staying unauthenticated");
            return;
        };
        self.set_auth(AuthState::Authenticating);
        if let Err(e) = self
            .transport
            .emit(ClientFrame::Authenticate { token })
            .await
        {
            tracing::warn!(err = %e, "failed to send authenticate frame");
            self.set_auth(AuthState::Unauthenticated);
        }
    }

    async fn handle_server_frame(self: &Arc<Self>, frame: ServerFrame) {
        match frame {
            ServerFrame::Authenticated { user_id } => {
                if user_id != self.user_id {
                    tracing::debug!(server = %user_id, local = %self.user_id, "server user id differs");
                }
                self.authenticated.store(true, Ordering::Relaxed);
                self.set_auth(AuthState::Authenticated);

                // Queued messages should not wait out stale backoffs now
                // that the socket is usable again.
                self.outbox.flush_now();

                if let Some(active) = self.active_conversation() {
                    let _ = self
                        .transport
                        .emit(ClientFrame::JoinRoom {
                            conversation_id: active,
                        })
                        .await;
                }

                let first = {
                    let mut state = self.state.lock();
                    let first = !state.synced_once;
                    state.synced_once = true;
                    first
                };
                if first {
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        this.full_sync().await;
                    });
                }
            }
            ServerFrame::AuthenticationFailed { reason } => {
                tracing::warn!(reason = %reason, "authentication rejected");
                self.authenticated.store(false, Ordering::Relaxed);
                self.set_auth(AuthState::Unauthenticated);
            }
            ServerFrame::SendAck(ack) => self.reconcile_late_ack(ack),
            ServerFrame::NewMessage(raw) => self.ingress_message(&raw),
            ServerFrame::Typing {
                conversation_id,
                user_id,
                typing,
            } => {
                {
                    let mut state = self.state.lock();
                    let key = (conversation_id.clone(), user_id.clone());
                    if typing {
                        state.typing.insert(key, Instant::now() + self.typing_expiry);
                    } else {
                        state.typing.remove(&key);
                    }
                }
                self.events.emit(&ClientEvent::Typing {
                    conversation_id,
                    user_id,
                    typing,
                });
            }
            ServerFrame::Presence { user_id, online } => {
                self.events.emit(&ClientEvent::Presence { user_id, online });
            }
        }
    }

    /// An ack that arrived outside the outbox's wait window — after an
    /// ambiguous timeout, or for a retry duplicate. Reconcile it against
    /// whatever record is still pending.
    fn reconcile_late_ack(&self, ack: SendAck) {
        if ack.success {
            let Some(id) = ack.message_id else {
                tracing::debug!(temp_id = %ack.temp_id, "late success ack without id, ignoring");
                return;
            };
            let updated = self.store.lock().confirm(&ack.temp_id, id);
            if let Some(message) = updated {
                tracing::info!(temp_id = %ack.temp_id, "late ack reconciled");
                self.events.emit(&ClientEvent::MessageUpdated { message });
            }
        } else {
            let key = MessageKey::Pending(ack.temp_id);
            let reason = ack.error.unwrap_or_else(|| "send rejected by server".into());
            let updated = self
                .store
                .lock()
                .set_status(&key, MessageStatus::Failed(reason.clone()));
            if let Some(message) = updated {
                tracing::warn!(temp_id = %ack.temp_id, reason = %reason, "late failure ack");
                self.events.emit(&ClientEvent::MessageFailed { key, reason });
                self.events.emit(&ClientEvent::MessageUpdated { message });
            }
        }
    }

    /// Normalize, decrypt, and merge one inbound message payload.
    fn ingress_message(&self, raw: &RawMessage) {
        if raw.has_unknown_status() {
            tracing::debug!(status = ?raw.status, "unknown wire status, defaulting");
        }
        let mut message = match raw.normalize(Timestamp::now()) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(err = %e, "dropping unnormalizable message payload");
                return;
            }
        };
        message.text =
            decrypt_or_passthrough(&*self.cipher, &message.text, &message.conversation_id);

        let inbound = message.sender_id != self.user_id;
        let active = self.active_conversation();

        let stored = {
            let mut store = self.store.lock();
            // The server echo of our own send carries both ids: re-key the
            // optimistic record before merging so no duplicate appears.
            if let (Some(temp), MessageKey::Confirmed(id)) = (raw.temp_id, &message.key) {
                store.confirm(&TempId::from_uuid(temp), id.clone());
            }
            let key = store.upsert(message);
            store.get(&key).cloned()
        };
        let Some(stored) = stored else { return };

        self.directory
            .lock()
            .record_message(&stored, inbound, active.as_ref());

        if inbound {
            self.events.emit(&ClientEvent::MessageReceived { message: stored });
        } else {
            self.events.emit(&ClientEvent::MessageUpdated { message: stored });
        }
        self.events.emit(&ClientEvent::ConversationsUpdated);
    }

    /// First-authentication sync: conversations, then the active
    /// conversation's messages.
    async fn full_sync(self: &Arc<Self>) {
        self.sync_conversations().await;
        if let Some(active) = self.active_conversation() {
            self.sync_messages(&active).await;
        }
    }

    /// Message sync bound to a selection epoch. If another selection
    /// happened while the response was in flight, the response is
    /// discarded — a slow sync for conversation X must never overwrite
    /// state after the user moved on to Y.
    async fn sync_messages_epoch(&self, conversation: &ConversationId, epoch: u64) {
        self.set_sync(SyncState::Syncing);
        let result = self.backend.fetch_messages(conversation).await;

        if self.state.lock().sync_epoch != epoch {
            tracing::debug!(conversation = %conversation, "discarding stale sync response");
            return;
        }

        match result {
            Ok(raws) => {
                let now = Timestamp::now();
                let count = raws.len();
                {
                    let mut store = self.store.lock();
                    for raw in raws {
                        match raw.normalize(now) {
                            Ok(mut message) => {
                                message.text = decrypt_or_passthrough(
                                    &*self.cipher,
                                    &message.text,
                                    &message.conversation_id,
                                );
                                store.upsert(message);
                            }
                            Err(e) => {
                                tracing::warn!(err = %e, "skipping unnormalizable synced message");
                            }
                        }
                    }
                }
                self.set_sync(SyncState::Idle);
                self.events.emit(&ClientEvent::MessagesSynced {
                    conversation_id: conversation.clone(),
                    count,
                });
            }
            Err(e) => {
                tracing::warn!(conversation = %conversation, err = %e, "message sync failed");
                self.set_sync(SyncState::Error);
            }
        }
    }

    /// Drop expired typing indicators and notify subscribers.
    fn sweep_typing(&self) {
        let now = Instant::now();
        let expired: Vec<(ConversationId, UserId)> = {
            let mut state = self.state.lock();
            let expired: Vec<_> = state
                .typing
                .iter()
                .filter(|(_, expiry)| **expiry <= now)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                state.typing.remove(key);
            }
            expired
        };
        for (conversation_id, user_id) in expired {
            self.events.emit(&ClientEvent::Typing {
                conversation_id,
                user_id,
                typing: false,
            });
        }
    }

    fn set_connection(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.state.lock();
            if state.connection == next {
                false
            } else {
                state.connection = next;
                true
            }
        };
        if changed {
            self.events
                .emit(&ClientEvent::ConnectionChanged { state: next });
        }
    }

    fn set_auth(&self, next: AuthState) {
        let changed = {
            let mut state = self.state.lock();
            if state.auth == next {
                false
            } else {
                state.auth = next;
                true
            }
        };
        if changed {
            self.events.emit(&ClientEvent::AuthChanged { state: next });
        }
    }

    fn set_sync(&self, next: SyncState) {
        let changed = {
            let mut state = self.state.lock();
            if state.sync == next {
                false
            } else {
                state.sync = next;
                true
            }
        };
        if changed {
            self.events.emit(&ClientEvent::SyncChanged { state: next });
        }
    }
}

impl<C: Cipher, T: Transport, B: Backend> Drop for ChatClient<C, T, B> {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
