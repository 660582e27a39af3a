// Property tests exercise arbitrary values; unwraps are expected here.
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property-based message store tests.
//!
//! The ordering invariant is load-bearing: the presentation layer renders
//! `messages_for` output directly, with no further sorting. These
//! properties insert messages in arbitrary orders and verify the result
//! is always ascending by timestamp, and that upserts stay idempotent.

use proptest::prelude::*;

use webchat::store::MessageStore;
use webchat_proto::message::{
    ConversationId, Message, MessageId, MessageKey, MessageStatus, Timestamp, UserId,
};

fn message(id: u32, ts: u64) -> Message {
    Message {
        key: MessageKey::Confirmed(MessageId::new(format!("m{id}"))),
        conversation_id: ConversationId::new("c1"),
        sender_id: UserId::new("u1"),
        sender_name: "U1".into(),
        text: format!("text {id}"),
        timestamp: Timestamp::from_millis(ts),
        status: MessageStatus::Delivered,
    }
}

proptest! {
    /// Messages with distinct timestamps come back sorted ascending no
    /// matter the insertion order.
    #[test]
    fn messages_for_is_sorted_ascending(mut timestamps in prop::collection::hash_set(0u64..1_000_000, 1..40)) {
        let timestamps: Vec<u64> = timestamps.drain().collect();

        let mut store = MessageStore::new();
        for (i, ts) in timestamps.iter().enumerate() {
            store.upsert(message(u32::try_from(i).unwrap(), *ts));
        }

        let result = store.messages_for(&ConversationId::new("c1"));
        prop_assert_eq!(result.len(), timestamps.len());
        for pair in result.windows(2) {
            prop_assert!(
                pair[0].timestamp <= pair[1].timestamp,
                "out of order: {} then {}",
                pair[0].timestamp,
                pair[1].timestamp
            );
        }
    }

    /// Upserting the same id any number of times leaves one record, with
    /// the last write's mutable fields.
    #[test]
    fn upsert_is_idempotent(ts in 0u64..1_000_000, copies in 1usize..10) {
        let mut store = MessageStore::new();
        for i in 0..copies {
            let mut msg = message(7, ts);
            msg.text = format!("version {i}");
            store.upsert(msg);
        }

        prop_assert_eq!(store.len(), 1);
        let result = store.messages_for(&ConversationId::new("c1"));
        prop_assert_eq!(result.len(), 1);
        prop_assert_eq!(result[0].text.clone(), format!("version {}", copies - 1));
    }

    /// Confirming a pending record under any server id leaves exactly one
    /// record, reachable only by the confirmed key.
    #[test]
    fn confirm_never_duplicates(ts in 0u64..1_000_000, id in "[a-z0-9]{1,16}") {
        let temp = webchat_proto::message::TempId::new();
        let mut store = MessageStore::new();
        store.upsert(Message {
            key: MessageKey::Pending(temp),
            conversation_id: ConversationId::new("c1"),
            sender_id: UserId::new("me"),
            sender_name: "Me".into(),
            text: "pending".into(),
            timestamp: Timestamp::from_millis(ts),
            status: MessageStatus::Sending,
        });

        let confirmed = store.confirm(&temp, MessageId::new(id.clone()));
        prop_assert!(confirmed.is_some());
        prop_assert_eq!(store.len(), 1);
        prop_assert!(store.get(&MessageKey::Pending(temp)).is_none());
        prop_assert!(store.get(&MessageKey::Confirmed(MessageId::new(id))).is_some());
    }
}
