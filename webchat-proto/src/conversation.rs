//! Conversation summary type for the `WebChat` directory.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, Message, Timestamp, UserId};

/// Summary of a one-to-one (or group) chat, as shown in the sidebar list.
///
/// `unread_count` only moves for inbound messages while the conversation
/// is not the active one, and resets to zero when it becomes active.
/// Directory ordering is by most-recent-activity descending, computed on
/// read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: ConversationId,
    /// The partner's user ID (the other party for one-to-one chats).
    pub partner_id: UserId,
    /// The partner's display name snapshot.
    pub partner_name: String,
    /// Avatar URL, if the partner has one.
    pub partner_avatar: Option<String>,
    /// Denormalized snapshot of the most recent message.
    pub last_message: Option<Message>,
    /// Count of inbound messages not yet seen by the local user.
    pub unread_count: u32,
    /// Time of the most recent activity in this conversation.
    pub updated_at: Timestamp,
}

impl Conversation {
    /// Record a new message touching this conversation.
    ///
    /// Updates the last-message snapshot and activity time when the
    /// message is at least as recent as what we have, and bumps the
    /// unread count for inbound messages to a non-active conversation.
    pub fn record_message(&mut self, msg: &Message, inbound: bool, active: bool) {
        let newer = self
            .last_message
            .as_ref()
            .is_none_or(|last| msg.timestamp >= last.timestamp);
        if newer {
            self.last_message = Some(msg.clone());
        }
        if msg.timestamp > self.updated_at {
            self.updated_at = msg.timestamp;
        }
        if inbound && !active {
            self.unread_count += 1;
        }
    }

    /// Reset the unread counter, typically when the conversation becomes
    /// the active one.
    pub const fn mark_read(&mut self) {
        self.unread_count = 0;
    }
}
