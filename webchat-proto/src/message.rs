//! Core message types for the `WebChat` messaging protocol.
//!
//! A message is keyed by exactly one of two identifiers at any time: a
//! client-generated [`TempId`] while the send is unconfirmed, or the
//! server-assigned [`MessageId`] once confirmed. The [`MessageKey`] union
//! makes that invariant explicit — reconciliation re-keys a record, it
//! never duplicates it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message text size in bytes (64 KB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Server-assigned stable message identifier.
///
/// Opaque to the client — the backend decides the format, so this wraps
/// a plain string rather than assuming a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a `MessageId` from its server-side string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this message ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated correlation identifier for an unconfirmed send.
///
/// Based on UUID v7 for time-ordering; unique per client session. The
/// server echoes it back in the send acknowledgment, which is how a
/// pending record finds its confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TempId(Uuid);

impl TempId {
    /// Creates a new time-ordered temporary identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TempId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a conversation (direct message thread or group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    /// Creates a `ConversationId` from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this conversation ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a user account on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a `UserId` from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this user ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// The single lookup key for a message record.
///
/// Exactly one variant is in force at any time: `Pending` while the send
/// awaits server confirmation, `Confirmed` once the server has assigned a
/// stable ID. When a confirmation arrives for a pending record, the record
/// is re-keyed from `Pending` to `Confirmed` — the old key stops resolving
/// and no duplicate is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKey {
    /// Client-side key for an optimistic, unconfirmed message.
    Pending(TempId),
    /// Server-assigned key for a confirmed message.
    Confirmed(MessageId),
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending(temp) => write!(f, "tmp:{temp}"),
            Self::Confirmed(id) => write!(f, "{id}"),
        }
    }
}

/// Tracks the delivery lifecycle of a message.
///
/// Progression is monotonic by [`rank`](Self::rank) — `Sending` < `Sent` <
/// `Delivered` < `Read` — except `Failed`, which can be entered from any
/// state and is terminal until a manual retry restarts the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Created locally, not yet acknowledged by the server.
    Sending,
    /// Accepted by the server (or optimistically assumed so).
    Sent,
    /// Delivered to the recipient.
    Delivered,
    /// Read by the recipient.
    Read,
    /// Delivery failed with a reason. Terminal until manual retry.
    Failed(String),
}

impl MessageStatus {
    /// Position of this status in the monotonic delivery progression.
    /// `Failed` ranks below everything so a merge never picks it up
    /// implicitly — entering `Failed` is always an explicit transition.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Failed(_) => 0,
            Self::Sending => 1,
            Self::Sent => 2,
            Self::Delivered => 3,
            Self::Read => 4,
        }
    }

    /// Merge an incoming status into the current one without moving
    /// backward in the progression.
    #[must_use]
    pub fn merged_with(&self, incoming: &Self) -> Self {
        if incoming.rank() > self.rank() {
            incoming.clone()
        } else {
            self.clone()
        }
    }

    /// Parse a wire-level status string (`"sent"`, `"delivered"`, ...).
    ///
    /// Returns `None` for unrecognized values so the caller can log and
    /// pick a default.
    #[must_use]
    pub fn parse_wire(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "sending" | "pending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "delivered" | "received" => Some(Self::Delivered),
            "read" | "seen" => Some(Self::Read),
            "failed" | "error" => Some(Self::Failed(String::new())),
            _ => None,
        }
    }
}

/// Error returned when outbound message text fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message text is empty after trimming.
    #[error("message text is empty")]
    Empty,
    /// Message text exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the text in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Validate and trim outbound message text.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] if the text is empty after trimming,
/// or [`ValidationError::TooLarge`] if it exceeds [`MAX_MESSAGE_SIZE`].
pub fn validate_text(text: &str) -> Result<&str, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    if trimmed.len() > MAX_MESSAGE_SIZE {
        return Err(ValidationError::TooLarge {
            size: trimmed.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(trimmed)
}

/// A single chat message as held by the client.
///
/// Created locally as `Sending` (outbound) or materialized as `Delivered`
/// (inbound); mutated in place as status advances; removed only by an
/// explicit local history clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The current lookup key (pending or confirmed).
    pub key: MessageKey,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Author identity snapshot at send/receive time.
    pub sender_id: UserId,
    /// Author display name snapshot.
    pub sender_name: String,
    /// Plain-text body (already decrypted if a cipher was in use).
    pub text: String,
    /// Client clock for outbound, server clock for inbound.
    pub timestamp: Timestamp,
    /// Current delivery status.
    pub status: MessageStatus,
}

impl Message {
    /// Returns the temp ID if this message is still pending.
    #[must_use]
    pub const fn temp_id(&self) -> Option<&TempId> {
        match &self.key {
            MessageKey::Pending(temp) => Some(temp),
            MessageKey::Confirmed(_) => None,
        }
    }

    /// Returns the server ID if this message is confirmed.
    #[must_use]
    pub const fn server_id(&self) -> Option<&MessageId> {
        match &self.key {
            MessageKey::Pending(_) => None,
            MessageKey::Confirmed(id) => Some(id),
        }
    }
}
