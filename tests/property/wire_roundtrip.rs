// Property tests exercise arbitrary values; unwraps are expected here.
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property-based wire codec tests.
//!
//! Verifies that any valid frame survives an encode -> decode round-trip
//! through the JSON codec, and that arbitrary text never causes a panic
//! in `decode` (it returns `Err` gracefully).

use proptest::prelude::*;
use uuid::Uuid;

use webchat_proto::message::{ConversationId, MessageId, TempId, Timestamp, UserId};
use webchat_proto::normalize::{RawMessage, RawTimestamp};
use webchat_proto::wire::{self, ClientFrame, SendAck, ServerFrame};

// --- Strategies for protocol types ---

fn arb_temp_id() -> impl Strategy<Value = TempId> {
    any::<u128>().prop_map(|n| TempId::from_uuid(Uuid::from_u128(n)))
}

fn arb_message_id() -> impl Strategy<Value = MessageId> {
    "[a-zA-Z0-9_-]{1,32}".prop_map(MessageId::new)
}

fn arb_conversation_id() -> impl Strategy<Value = ConversationId> {
    "[a-zA-Z0-9_-]{1,32}".prop_map(ConversationId::new)
}

fn arb_user_id() -> impl Strategy<Value = UserId> {
    "[a-zA-Z0-9_-]{1,32}".prop_map(UserId::new)
}

fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
    any::<u64>().prop_map(Timestamp::from_millis)
}

fn arb_text() -> impl Strategy<Value = String> {
    "[^\u{0}]{1,256}".prop_map(String::from)
}

fn arb_send_ack() -> impl Strategy<Value = SendAck> {
    (
        arb_temp_id(),
        any::<bool>(),
        prop::option::of(arb_message_id()),
        prop::option::of(arb_text()),
    )
        .prop_map(|(temp_id, success, message_id, error)| SendAck {
            temp_id,
            success,
            message_id,
            error,
        })
}

fn arb_raw_message() -> impl Strategy<Value = RawMessage> {
    (
        prop::option::of("[a-zA-Z0-9_-]{1,32}"),
        prop::option::of(any::<u128>().prop_map(Uuid::from_u128)),
        "[a-zA-Z0-9_-]{1,32}",
        "[a-zA-Z0-9_-]{1,32}",
        prop::option::of(arb_text()),
        arb_text(),
        prop::option::of(any::<u64>().prop_map(RawTimestamp::Millis)),
        prop::option::of("[a-z]{1,12}"),
    )
        .prop_map(
            |(id, temp_id, conversation_id, sender_id, sender_name, text, timestamp, status)| {
                RawMessage {
                    id,
                    temp_id,
                    conversation_id,
                    sender_id,
                    sender_name,
                    text,
                    timestamp,
                    status,
                }
            },
        )
}

fn arb_client_frame() -> impl Strategy<Value = ClientFrame> {
    prop_oneof![
        arb_text().prop_map(|token| ClientFrame::Authenticate { token }),
        (
            arb_temp_id(),
            arb_conversation_id(),
            arb_text(),
            arb_timestamp()
        )
            .prop_map(|(temp_id, conversation_id, text, timestamp)| {
                ClientFrame::SendMessage {
                    temp_id,
                    conversation_id,
                    text,
                    timestamp,
                }
            }),
        arb_conversation_id().prop_map(|conversation_id| ClientFrame::JoinRoom {
            conversation_id
        }),
        arb_conversation_id().prop_map(|conversation_id| ClientFrame::TypingStart {
            conversation_id
        }),
        arb_conversation_id().prop_map(|conversation_id| ClientFrame::TypingStop {
            conversation_id
        }),
    ]
}

fn arb_server_frame() -> impl Strategy<Value = ServerFrame> {
    prop_oneof![
        arb_user_id().prop_map(|user_id| ServerFrame::Authenticated { user_id }),
        arb_text().prop_map(|reason| ServerFrame::AuthenticationFailed { reason }),
        arb_send_ack().prop_map(ServerFrame::SendAck),
        arb_raw_message().prop_map(ServerFrame::NewMessage),
        (arb_conversation_id(), arb_user_id(), any::<bool>()).prop_map(
            |(conversation_id, user_id, typing)| ServerFrame::Typing {
                conversation_id,
                user_id,
                typing,
            }
        ),
        (arb_user_id(), any::<bool>())
            .prop_map(|(user_id, online)| ServerFrame::Presence { user_id, online }),
    ]
}

// --- Property tests ---

proptest! {
    /// Any valid client frame survives an encode -> decode round-trip.
    #[test]
    fn client_frame_round_trip(frame in arb_client_frame()) {
        let text = wire::encode(&frame).expect("encode should succeed");
        let decoded: ClientFrame = wire::decode(&text).expect("decode should succeed");
        prop_assert_eq!(frame, decoded);
    }

    /// Any valid server frame survives an encode -> decode round-trip.
    #[test]
    fn server_frame_round_trip(frame in arb_server_frame()) {
        let text = wire::encode(&frame).expect("encode should succeed");
        let decoded: ServerFrame = wire::decode(&text).expect("decode should succeed");
        prop_assert_eq!(frame, decoded);
    }

    /// Arbitrary text never panics the decoder.
    #[test]
    fn arbitrary_text_never_panics_decode(text in ".{0,512}") {
        let _ = wire::decode::<ServerFrame>(&text);
        let _ = wire::decode::<ClientFrame>(&text);
    }

    /// Arbitrary JSON values never panic the decoder either.
    #[test]
    fn arbitrary_json_never_panics_decode(n in any::<i64>(), s in "[a-z]{0,16}") {
        let text = format!(r#"{{"event":"{s}","data":{n}}}"#);
        let _ = wire::decode::<ServerFrame>(&text);
    }

    /// A normalized raw message keeps its identifying fields through a
    /// JSON round-trip.
    #[test]
    fn raw_message_round_trip(raw in arb_raw_message()) {
        let text = serde_json::to_string(&raw).expect("encode should succeed");
        let decoded: RawMessage = serde_json::from_str(&text).expect("decode should succeed");
        prop_assert_eq!(raw, decoded);
    }
}
