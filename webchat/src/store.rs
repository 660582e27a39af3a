//! In-memory message store and conversation directory.
//!
//! Pure keyed containers with merge semantics — no network or timer
//! logic. The orchestrator owns both and shares them with the outbox
//! behind a mutex; all methods here take `&mut self` and return quickly.
//!
//! The one hard invariant consumed directly by presentation layers:
//! [`MessageStore::messages_for`] returns messages sorted ascending by
//! timestamp, regardless of arrival order.

use std::collections::HashMap;

use webchat_proto::conversation::Conversation;
use webchat_proto::message::{
    ConversationId, Message, MessageId, MessageKey, MessageStatus, TempId, Timestamp, UserId,
};

/// In-memory mapping of message keys to records, indexed by conversation.
///
/// Records are keyed by [`MessageKey`]: `Pending(temp_id)` until the
/// server confirms, `Confirmed(id)` after. [`confirm`](Self::confirm)
/// performs the re-key; [`upsert`](Self::upsert) merges without ever
/// duplicating a confirmed ID.
#[derive(Default)]
pub struct MessageStore {
    /// All records, keyed by their current lookup key.
    messages: HashMap<MessageKey, Message>,
    /// Insertion-ordered keys per conversation.
    by_conversation: HashMap<ConversationId, Vec<MessageKey>>,
}

impl MessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge a record.
    ///
    /// If a record with the same key exists, mutable fields are
    /// last-write-wins and the status merges forward only (a later
    /// duplicate can never regress `Read` back to `Delivered`). Returns
    /// the key under which the record is stored.
    pub fn upsert(&mut self, msg: Message) -> MessageKey {
        if let Some(existing) = self.messages.get_mut(&msg.key) {
            existing.status = existing.status.merged_with(&msg.status);
            existing.text = msg.text;
            existing.timestamp = msg.timestamp;
            existing.sender_name = msg.sender_name;
            return msg.key;
        }

        let key = msg.key.clone();
        self.by_conversation
            .entry(msg.conversation_id.clone())
            .or_default()
            .push(key.clone());
        self.messages.insert(key.clone(), msg);
        key
    }

    /// Re-key a pending record to its server-confirmed identity.
    ///
    /// After this call, lookup by the temp ID no longer resolves and the
    /// record is reachable under `Confirmed(id)` with status advanced to
    /// at least `Sent`. If the confirmed ID already exists (the server
    /// echoed the message before the ack arrived), the pending duplicate
    /// is dropped in favor of the existing record.
    ///
    /// Returns the record under its confirmed key, or `None` if no
    /// pending record matched.
    pub fn confirm(&mut self, temp: &TempId, id: MessageId) -> Option<Message> {
        let pending_key = MessageKey::Pending(*temp);
        let confirmed_key = MessageKey::Confirmed(id);

        let pending = self.messages.remove(&pending_key)?;

        if let Some(existing) = self.messages.get_mut(&confirmed_key) {
            // Ack raced the server echo: keep the echoed record, drop the
            // pending one entirely.
            existing.status = existing.status.merged_with(&MessageStatus::Sent);
            if let Some(keys) = self.by_conversation.get_mut(&pending.conversation_id) {
                keys.retain(|k| *k != pending_key);
            }
            return Some(existing.clone());
        }

        let mut record = pending;
        record.key = confirmed_key.clone();
        record.status = record.status.merged_with(&MessageStatus::Sent);

        if let Some(keys) = self.by_conversation.get_mut(&record.conversation_id) {
            for key in keys.iter_mut() {
                if *key == pending_key {
                    *key = confirmed_key.clone();
                }
            }
        }

        self.messages.insert(confirmed_key.clone(), record);
        self.messages.get(&confirmed_key).cloned()
    }

    /// Overwrite a record's status, regardless of rank.
    ///
    /// This is the explicit-transition path: terminal `Failed`, and the
    /// `Failed -> Sending` reset on manual retry. Returns the updated
    /// record.
    pub fn set_status(&mut self, key: &MessageKey, status: MessageStatus) -> Option<Message> {
        let msg = self.messages.get_mut(key)?;
        msg.status = status;
        Some(msg.clone())
    }

    /// Advance a record's status, respecting rank — the record never
    /// moves backward. Returns the updated record.
    pub fn advance_status(&mut self, key: &MessageKey, status: &MessageStatus) -> Option<Message> {
        let msg = self.messages.get_mut(key)?;
        msg.status = msg.status.merged_with(status);
        Some(msg.clone())
    }

    /// Look up a record by its current key.
    #[must_use]
    pub fn get(&self, key: &MessageKey) -> Option<&Message> {
        self.messages.get(key)
    }

    /// All messages for a conversation, sorted ascending by timestamp.
    ///
    /// The sort is stable, so messages sharing a timestamp keep their
    /// insertion order.
    #[must_use]
    pub fn messages_for(&self, conversation: &ConversationId) -> Vec<Message> {
        let Some(keys) = self.by_conversation.get(conversation) else {
            return Vec::new();
        };
        let mut result: Vec<Message> = keys
            .iter()
            .filter_map(|k| self.messages.get(k))
            .cloned()
            .collect();
        result.sort_by_key(|m| m.timestamp);
        result
    }

    /// Remove all messages for a conversation. Returns how many were
    /// removed. This is the only deletion path.
    pub fn clear_conversation(&mut self, conversation: &ConversationId) -> usize {
        let Some(keys) = self.by_conversation.remove(conversation) else {
            return 0;
        };
        let mut removed = 0;
        for key in keys {
            if self.messages.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Total number of records across all conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// In-memory mapping of conversation IDs to summaries.
#[derive(Default)]
pub struct ConversationDirectory {
    conversations: HashMap<ConversationId, Conversation>,
}

impl ConversationDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace-or-insert a conversation by ID.
    pub fn upsert(&mut self, conversation: Conversation) {
        self.conversations
            .insert(conversation.id.clone(), conversation);
    }

    /// Fold a message into the directory: updates the last-message
    /// snapshot and activity time, and bumps the unread count for inbound
    /// messages when the conversation is not the active one. Creates the
    /// conversation on first message.
    pub fn record_message(
        &mut self,
        msg: &Message,
        inbound: bool,
        active: Option<&ConversationId>,
    ) {
        let is_active = active == Some(&msg.conversation_id);
        let conv = self
            .conversations
            .entry(msg.conversation_id.clone())
            .or_insert_with(|| {
                // First message for an unknown conversation: the partner
                // is the sender for inbound traffic; outbound placeholders
                // get overwritten by the next directory sync.
                let (partner_id, partner_name) = if inbound {
                    (msg.sender_id.clone(), msg.sender_name.clone())
                } else {
                    (
                        UserId::new(msg.conversation_id.as_str()),
                        msg.conversation_id.as_str().to_string(),
                    )
                };
                Conversation {
                    id: msg.conversation_id.clone(),
                    partner_id,
                    partner_name,
                    partner_avatar: None,
                    last_message: None,
                    unread_count: 0,
                    updated_at: Timestamp::from_millis(0),
                }
            });
        conv.record_message(msg, inbound, is_active);
    }

    /// Reset the unread counter for a conversation. Returns `false` if
    /// the conversation is unknown.
    pub fn reset_unread(&mut self, id: &ConversationId) -> bool {
        match self.conversations.get_mut(id) {
            Some(conv) => {
                conv.mark_read();
                true
            }
            None => false,
        }
    }

    /// Look up a conversation by ID.
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// The partner for a conversation, if known.
    #[must_use]
    pub fn partner_of(&self, id: &ConversationId) -> Option<UserId> {
        self.conversations.get(id).map(|c| c.partner_id.clone())
    }

    /// All conversations ordered by most recent activity, descending.
    /// Computed on read — writes never re-sort.
    #[must_use]
    pub fn ordered(&self) -> Vec<Conversation> {
        let mut result: Vec<Conversation> = self.conversations.values().cloned().collect();
        result.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        result
    }

    /// Number of conversations in the directory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
