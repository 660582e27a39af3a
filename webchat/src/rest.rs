//! REST collaborator boundary: sync endpoints and the HTTP send fallback.
//!
//! The orchestrator and outbox talk to a [`Backend`] trait; production
//! uses [`HttpBackend`] over `reqwest`, tests use [`InMemoryBackend`].
//! Payloads cross this boundary as raw DTOs — normalization happens once
//! at ingress, in the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use webchat_proto::message::{ConversationId, TempId, Timestamp, UserId};
use webchat_proto::normalize::{RawConversation, RawMessage, RawTimestamp};

/// Source of the opaque bearer token.
///
/// Acquisition and refresh are the auth collaborator's job; the core only
/// reads the current token. `None` means the session is not (yet)
/// authenticated.
pub trait TokenProvider: Send + Sync {
    /// The current bearer token, if any.
    fn token(&self) -> Option<String>;
}

/// Token provider holding a fixed token, for tests and simple embeddings.
pub struct StaticToken(Option<String>);

impl StaticToken {
    /// A provider that always returns the given token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// A provider with no token.
    #[must_use]
    pub const fn empty() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Errors from the REST collaborator.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The request could not be performed (connect failure, timeout).
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("http {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The response body did not match the expected shape.
    #[error("response decode failed: {0}")]
    Decode(String),
}

/// REST sync and fallback-send operations.
pub trait Backend: Send + Sync {
    /// Fetch the authoritative conversation list.
    fn fetch_conversations(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<RawConversation>, BackendError>> + Send;

    /// Fetch the authoritative message list for one conversation.
    fn fetch_messages(
        &self,
        conversation: &ConversationId,
    ) -> impl std::future::Future<Output = Result<Vec<RawMessage>, BackendError>> + Send;

    /// Persist a message over HTTP — the fallback path when the socket is
    /// down. The temp ID makes the call idempotent server-side.
    fn post_message(
        &self,
        conversation: &ConversationId,
        receiver: Option<&UserId>,
        text: &str,
        temp_id: &TempId,
    ) -> impl std::future::Future<Output = Result<RawMessage, BackendError>> + Send;
}

impl<B: Backend> Backend for Arc<B> {
    async fn fetch_conversations(&self) -> Result<Vec<RawConversation>, BackendError> {
        (**self).fetch_conversations().await
    }

    async fn fetch_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<RawMessage>, BackendError> {
        (**self).fetch_messages(conversation).await
    }

    async fn post_message(
        &self,
        conversation: &ConversationId,
        receiver: Option<&UserId>,
        text: &str,
        temp_id: &TempId,
    ) -> Result<RawMessage, BackendError> {
        (**self).post_message(conversation, receiver, text, temp_id).await
    }
}

/// JSON body for the message POST endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageRequest<'a> {
    conversation_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    receiver_id: Option<&'a str>,
    content: &'a str,
    temp_id: String,
}

/// Production [`Backend`] over `reqwest`.
pub struct HttpBackend<P: TokenProvider> {
    /// Base URL of the REST API, without trailing slash.
    base_url: String,
    /// Shared HTTP client.
    client: reqwest::Client,
    /// Bearer token source.
    tokens: P,
}

impl<P: TokenProvider> HttpBackend<P> {
    /// Create a backend client for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Request`] if the HTTP client cannot be
    /// constructed.
    pub fn new(
        base_url: impl Into<String>,
        tokens: P,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            base_url,
            client,
            tokens,
        })
    }

    /// Attach the bearer token, when one is available.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and decode a JSON body, mapping failures onto
    /// [`BackendError`].
    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

impl<P: TokenProvider> Backend for HttpBackend<P> {
    async fn fetch_conversations(&self) -> Result<Vec<RawConversation>, BackendError> {
        let url = format!("{}/conversations", self.base_url);
        self.execute(self.client.get(url)).await
    }

    async fn fetch_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<RawMessage>, BackendError> {
        let url = format!("{}/conversations/{}/messages", self.base_url, conversation);
        self.execute(self.client.get(url)).await
    }

    async fn post_message(
        &self,
        conversation: &ConversationId,
        receiver: Option<&UserId>,
        text: &str,
        temp_id: &TempId,
    ) -> Result<RawMessage, BackendError> {
        let url = format!("{}/messages", self.base_url);
        let body = PostMessageRequest {
            conversation_id: conversation.as_str(),
            receiver_id: receiver.map(UserId::as_str),
            content: text,
            temp_id: temp_id.to_string(),
        };
        self.execute(self.client.post(url).json(&body)).await
    }
}

/// A post attempt recorded by [`InMemoryBackend::post_message`].
/// Recorded for failing attempts too, so tests can count and time them.
#[derive(Debug, Clone)]
pub struct PostedMessage {
    /// Target conversation.
    pub conversation_id: ConversationId,
    /// Message body as posted.
    pub text: String,
    /// Correlation ID from the client.
    pub temp_id: TempId,
    /// When the attempt arrived (tokio clock, so paused-time tests can
    /// measure backoff gaps).
    pub at: tokio::time::Instant,
}

/// In-memory [`Backend`] for testing.
///
/// Seed it with raw conversations and messages, toggle failure modes,
/// and inspect what was posted. Fetches can be delayed per conversation
/// to exercise stale-response cancellation.
#[derive(Default)]
pub struct InMemoryBackend {
    conversations: parking_lot::Mutex<Vec<RawConversation>>,
    messages: parking_lot::Mutex<HashMap<String, Vec<RawMessage>>>,
    fetch_delays: parking_lot::Mutex<HashMap<String, Duration>>,
    fail_fetches: AtomicBool,
    fail_posts: AtomicBool,
    posts: parking_lot::Mutex<Vec<PostedMessage>>,
    next_id: AtomicU64,
}

impl InMemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the conversation list.
    pub fn seed_conversations(&self, conversations: Vec<RawConversation>) {
        *self.conversations.lock() = conversations;
    }

    /// Seed the message list for a conversation.
    pub fn seed_messages(&self, conversation: &ConversationId, messages: Vec<RawMessage>) {
        self.messages
            .lock()
            .insert(conversation.as_str().to_string(), messages);
    }

    /// Delay message fetches for one conversation by `delay`.
    pub fn delay_messages_fetch(&self, conversation: &ConversationId, delay: Duration) {
        self.fetch_delays
            .lock()
            .insert(conversation.as_str().to_string(), delay);
    }

    /// Make all fetches fail until reset.
    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Make all posts fail until reset.
    pub fn set_fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::SeqCst);
    }

    /// Every post attempt so far, in order (including failed ones).
    pub fn posted(&self) -> Vec<PostedMessage> {
        self.posts.lock().clone()
    }
}

impl Backend for InMemoryBackend {
    async fn fetch_conversations(&self) -> Result<Vec<RawConversation>, BackendError> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(BackendError::Request("backend unavailable".into()));
        }
        Ok(self.conversations.lock().clone())
    }

    async fn fetch_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<RawMessage>, BackendError> {
        let delay = self
            .fetch_delays
            .lock()
            .get(conversation.as_str())
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(BackendError::Request("backend unavailable".into()));
        }
        Ok(self
            .messages
            .lock()
            .get(conversation.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn post_message(
        &self,
        conversation: &ConversationId,
        _receiver: Option<&UserId>,
        text: &str,
        temp_id: &TempId,
    ) -> Result<RawMessage, BackendError> {
        self.posts.lock().push(PostedMessage {
            conversation_id: conversation.clone(),
            text: text.to_string(),
            temp_id: *temp_id,
            at: tokio::time::Instant::now(),
        });

        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(BackendError::Http {
                status: 503,
                body: "backend unavailable".into(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RawMessage {
            id: Some(format!("srv-{id}")),
            temp_id: Some(*temp_id.as_uuid()),
            conversation_id: conversation.as_str().to_string(),
            sender_id: "self".into(),
            sender_name: None,
            text: text.to_string(),
            timestamp: Some(RawTimestamp::Millis(Timestamp::now().as_millis())),
            status: Some("sent".into()),
        })
    }
}
