//! Ingress normalization for duck-typed backend payloads.
//!
//! The REST endpoints and the event socket disagree on field naming
//! (camelCase vs snake_case) and older backend versions use alternative
//! names for the same fields (`content`/`body` for the text, `from` for
//! the sender). [`RawMessage`] and [`RawConversation`] absorb all known
//! variants through serde aliases, and a single `normalize()` per DTO
//! converts to the internal model exactly once — nothing downstream ever
//! re-interprets raw shapes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::message::{
    ConversationId, Message, MessageId, MessageKey, MessageStatus, TempId, Timestamp, UserId,
};

/// Error returned when a raw payload cannot be normalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// The payload carries neither a server ID nor a temp ID.
    #[error("message payload has neither id nor temp_id")]
    MissingKey,
}

/// A timestamp as backends actually send it: epoch millis as a number,
/// or the same number stringified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Epoch milliseconds as a JSON number.
    Millis(u64),
    /// Epoch milliseconds as a JSON string.
    Text(String),
}

impl RawTimestamp {
    /// Resolve to a [`Timestamp`], or `None` if the value is unparseable.
    #[must_use]
    pub fn resolve(&self) -> Option<Timestamp> {
        match self {
            Self::Millis(ms) => Some(Timestamp::from_millis(*ms)),
            Self::Text(s) => s.trim().parse::<u64>().ok().map(Timestamp::from_millis),
        }
    }
}

/// Message payload as received from the socket or REST endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Server-assigned ID. Absent only for optimistic echoes.
    #[serde(default, alias = "_id", alias = "messageId", alias = "message_id")]
    pub id: Option<String>,
    /// Client correlation ID, echoed for the sender's own messages.
    #[serde(default, alias = "tempId", alias = "clientId", alias = "client_id")]
    pub temp_id: Option<Uuid>,
    /// Owning conversation.
    #[serde(alias = "conversationId", alias = "chatId", alias = "chat_id")]
    pub conversation_id: String,
    /// Author ID.
    #[serde(alias = "senderId", alias = "from", alias = "author_id")]
    pub sender_id: String,
    /// Author display name, when the backend includes it.
    #[serde(default, alias = "senderName", alias = "author_name", alias = "username")]
    pub sender_name: Option<String>,
    /// Message body.
    #[serde(alias = "content", alias = "body")]
    pub text: String,
    /// Creation time, in whichever shape the backend chose.
    #[serde(default, alias = "createdAt", alias = "created_at", alias = "sentAt")]
    pub timestamp: Option<RawTimestamp>,
    /// Delivery status string, when present.
    #[serde(default)]
    pub status: Option<String>,
}

impl RawMessage {
    /// Normalize into the internal [`Message`] model.
    ///
    /// The key is the server ID when present, else the temp ID. A raw
    /// status string that parses wins; otherwise inbound messages default
    /// to `Delivered`. A missing or unparseable timestamp falls back to
    /// `fallback_now` (the receive time).
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::MissingKey`] if the payload carries
    /// neither identifier.
    pub fn normalize(&self, fallback_now: Timestamp) -> Result<Message, NormalizeError> {
        let key = match (&self.id, &self.temp_id) {
            (Some(id), _) => MessageKey::Confirmed(MessageId::new(id.clone())),
            (None, Some(temp)) => MessageKey::Pending(TempId::from_uuid(*temp)),
            (None, None) => return Err(NormalizeError::MissingKey),
        };

        let status = self
            .status
            .as_deref()
            .and_then(MessageStatus::parse_wire)
            .unwrap_or(MessageStatus::Delivered);

        let timestamp = self
            .timestamp
            .as_ref()
            .and_then(RawTimestamp::resolve)
            .unwrap_or(fallback_now);

        Ok(Message {
            key,
            conversation_id: ConversationId::new(self.conversation_id.clone()),
            sender_id: UserId::new(self.sender_id.clone()),
            sender_name: self
                .sender_name
                .clone()
                .unwrap_or_else(|| self.sender_id.clone()),
            text: self.text.clone(),
            timestamp,
            status,
        })
    }

    /// Whether the raw status string was present but unrecognized.
    ///
    /// The caller is expected to log these; normalization itself stays
    /// pure.
    #[must_use]
    pub fn has_unknown_status(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| MessageStatus::parse_wire(s).is_none())
    }
}

/// Conversation summary payload as received from the REST endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawConversation {
    /// Conversation identifier.
    #[serde(alias = "_id", alias = "conversationId", alias = "conversation_id")]
    pub id: String,
    /// The partner's user ID.
    #[serde(alias = "partnerId", alias = "userId", alias = "peer_id")]
    pub partner_id: String,
    /// The partner's display name.
    #[serde(default, alias = "partnerName", alias = "username", alias = "name")]
    pub partner_name: Option<String>,
    /// The partner's avatar URL.
    #[serde(default, alias = "partnerAvatar", alias = "avatar", alias = "avatarUrl")]
    pub partner_avatar: Option<String>,
    /// Snapshot of the most recent message.
    #[serde(default, alias = "lastMessage", alias = "last_msg")]
    pub last_message: Option<RawMessage>,
    /// Unread message count.
    #[serde(default, alias = "unreadCount", alias = "unread")]
    pub unread_count: u32,
    /// Most recent activity time.
    #[serde(default, alias = "updatedAt", alias = "lastActivity", alias = "last_activity")]
    pub updated_at: Option<RawTimestamp>,
}

impl RawConversation {
    /// Normalize into the internal [`Conversation`] model.
    ///
    /// A last-message payload that fails to normalize is dropped rather
    /// than failing the whole conversation. Missing activity time falls
    /// back to the last message's timestamp, then to `fallback_now`.
    #[must_use]
    pub fn normalize(&self, fallback_now: Timestamp) -> Conversation {
        let last_message = self
            .last_message
            .as_ref()
            .and_then(|raw| raw.normalize(fallback_now).ok());

        let updated_at = self
            .updated_at
            .as_ref()
            .and_then(RawTimestamp::resolve)
            .or_else(|| last_message.as_ref().map(|m| m.timestamp))
            .unwrap_or(fallback_now);

        Conversation {
            id: ConversationId::new(self.id.clone()),
            partner_id: UserId::new(self.partner_id.clone()),
            partner_name: self
                .partner_name
                .clone()
                .unwrap_or_else(|| self.partner_id.clone()),
            partner_avatar: self.partner_avatar.clone(),
            last_message,
            unread_count: self.unread_count,
            updated_at,
        }
    }
}
