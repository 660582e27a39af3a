//! Socket wire frames and JSON codec for the `WebChat` event channel.
//!
//! Every frame on the event socket is a JSON object with an `event` name
//! and a `data` payload, mirroring browser-style event sockets. Client and
//! server frames are separate enums so each side only decodes what it can
//! actually receive.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, MessageId, TempId, Timestamp, UserId};
use crate::normalize::RawMessage;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization to JSON failed.
    #[error("encode error: {0}")]
    Encode(String),
    /// Deserialization from JSON failed.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Server response correlating to a specific send attempt.
///
/// `temp_id` echoes the client correlation ID; on success `message_id`
/// carries the stable server-assigned ID the record is re-keyed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    /// The client correlation ID this ack answers.
    pub temp_id: TempId,
    /// Whether the server persisted the message.
    pub success: bool,
    /// The stable server ID, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Failure description, present on explicit failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Frames the client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Present the bearer token for this session.
    Authenticate {
        /// Opaque bearer token from the auth collaborator.
        token: String,
    },
    /// Send a chat message.
    SendMessage {
        /// Client correlation ID, echoed back in the ack.
        temp_id: TempId,
        /// Target conversation.
        conversation_id: ConversationId,
        /// Message body (possibly ciphertext).
        text: String,
        /// Client-side creation time.
        timestamp: Timestamp,
    },
    /// Join the server-side room for a conversation to receive its live
    /// events.
    JoinRoom {
        /// The conversation whose room to join.
        conversation_id: ConversationId,
    },
    /// The local user started typing in a conversation.
    TypingStart {
        /// The conversation being typed in.
        conversation_id: ConversationId,
    },
    /// The local user stopped typing in a conversation.
    TypingStop {
        /// The conversation no longer being typed in.
        conversation_id: ConversationId,
    },
}

/// Frames the server sends to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Authentication accepted.
    Authenticated {
        /// The authenticated user's ID as the server sees it.
        user_id: UserId,
    },
    /// Authentication rejected.
    AuthenticationFailed {
        /// Human-readable rejection reason.
        reason: String,
    },
    /// Acknowledgment for a `SendMessage` frame.
    SendAck(SendAck),
    /// A new message materialized in some conversation.
    ///
    /// Carried as a raw payload — field naming varies across backend
    /// versions, so normalization happens once at ingress.
    NewMessage(RawMessage),
    /// A remote user started or stopped typing.
    Typing {
        /// The conversation being typed in.
        conversation_id: ConversationId,
        /// The user whose typing state changed.
        user_id: UserId,
        /// `true` for typing-start, `false` for typing-stop.
        typing: bool,
    },
    /// A user's online presence changed.
    Presence {
        /// The user whose presence changed.
        user_id: UserId,
        /// Whether the user is now online.
        online: bool,
    },
}

/// Encodes a frame into its JSON text representation.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the frame cannot be serialized.
pub fn encode<F: Serialize>(frame: &F) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes a frame from its JSON text representation.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the text is not valid JSON or does
/// not match the expected frame shape.
pub fn decode<F: for<'de> Deserialize<'de>>(text: &str) -> Result<F, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Decode(e.to_string()))
}
