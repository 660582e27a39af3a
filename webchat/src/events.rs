//! Typed event surface for presentation layers.
//!
//! A closed enumeration of events with typed payloads, delivered through
//! a synchronous publish/subscribe registry. Handlers run in registration
//! order on the emitting task; a panicking handler is caught and logged,
//! never interrupting the other handlers or the emitter.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use webchat_proto::message::{ConversationId, Message, MessageKey, UserId};

use crate::client::{AuthState, ConnectionState, SyncState};

/// Events emitted by the client core. The set is closed — presentation
/// layers match on variants, never on event-name strings.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A message record changed (status advance, re-key, optimistic
    /// insert).
    MessageUpdated {
        /// The record after the change.
        message: Message,
    },
    /// An inbound message materialized.
    MessageReceived {
        /// The received message.
        message: Message,
    },
    /// A send failed terminally; a manual retry is the only way forward.
    MessageFailed {
        /// Key of the failed record.
        key: MessageKey,
        /// Failure description for inline display.
        reason: String,
    },
    /// A queued send exceeded the maximum queue age and was dropped.
    MessageAbandoned {
        /// Key of the abandoned record.
        key: MessageKey,
    },
    /// Messages for a conversation were synced from the backend.
    MessagesSynced {
        /// The conversation that was synced.
        conversation_id: ConversationId,
        /// Number of records merged.
        count: usize,
    },
    /// The conversation directory changed.
    ConversationsUpdated,
    /// The active conversation changed; presentation state should reset.
    ConversationChanged {
        /// The newly active conversation.
        id: ConversationId,
    },
    /// Local history for a conversation was cleared.
    HistoryCleared {
        /// The cleared conversation.
        conversation_id: ConversationId,
    },
    /// The transport connection state changed.
    ConnectionChanged {
        /// The new connection state.
        state: ConnectionState,
    },
    /// The authentication state changed.
    AuthChanged {
        /// The new auth state.
        state: AuthState,
    },
    /// The sync state changed.
    SyncChanged {
        /// The new sync state.
        state: SyncState,
    },
    /// A remote user's typing state changed.
    Typing {
        /// The conversation being typed in.
        conversation_id: ConversationId,
        /// The user whose typing state changed.
        user_id: UserId,
        /// Whether the user is currently typing.
        typing: bool,
    },
    /// A user's online presence changed.
    Presence {
        /// The user whose presence changed.
        user_id: UserId,
        /// Whether the user is online.
        online: bool,
    },
}

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Synchronous publish/subscribe registry for [`ClientEvent`]s.
///
/// Handlers are invoked in registration order on the emitting task. A
/// handler that panics is isolated: the panic is caught, logged, and the
/// remaining handlers still run.
#[derive(Default)]
pub struct EventBus {
    /// Registered handlers in registration order.
    handlers: Mutex<Vec<(SubscriptionId, Handler)>>,
    /// Source for subscription IDs.
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty event bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Returns an ID for [`off`](Self::off).
    pub fn on(&self, handler: impl Fn(&ClientEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if the ID was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(h_id, _)| *h_id != id);
        handlers.len() != before
    }

    /// Deliver an event to every registered handler, in registration
    /// order. The handler list is snapshotted first, so handlers may
    /// subscribe or unsubscribe from inside a callback.
    pub fn emit(&self, event: &ClientEvent) {
        let snapshot: Vec<Handler> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(?event, "event handler panicked, continuing with remaining handlers");
            }
        }
    }

    /// Number of registered handlers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }
}
