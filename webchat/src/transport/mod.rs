//! Transport layer abstraction for the `WebChat` event socket.
//!
//! Defines the [`Transport`] trait that all transport implementations must
//! satisfy. Concrete implementations:
//! - [`socket::SocketTransport`] — WebSocket transport with automatic
//!   reconnection
//! - [`loopback::LoopbackTransport`] — in-process channel-based transport
//!   for testing

pub mod loopback;
pub mod socket;

use std::time::Duration;

use webchat_proto::wire::{ClientFrame, SendAck, ServerFrame};

/// Lifecycle and data events surfaced by a transport.
///
/// The orchestrator consumes these through [`Transport::next_event`] and
/// drives its connection state machine from them.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection is established and usable.
    Connected,
    /// The connection dropped; automatic reconnection will follow if
    /// attempts remain.
    Disconnected {
        /// Human-readable description of why the connection dropped.
        reason: String,
    },
    /// A reconnect attempt is scheduled after the given backoff delay.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Backoff delay before this attempt.
        delay: Duration,
    },
    /// All reconnect attempts are exhausted. Terminal — no further
    /// automatic retries.
    ConnectionFailed,
    /// A server frame arrived.
    Frame(ServerFrame),
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// No connection is currently established.
    #[error("not connected")]
    NotConnected,

    /// The operation timed out. For acknowledgment waits this is
    /// AMBIGUOUS — the send may or may not have reached the server.
    #[error("transport operation timed out")]
    Timeout,

    /// The frame carries no correlation ID, so no ack can be awaited.
    #[error("frame has no correlation id for acknowledgment")]
    NotAckable,

    /// The socket URL could not be parsed.
    #[error("invalid socket url: {0}")]
    InvalidUrl(String),

    /// Encoding or decoding a frame failed.
    #[error("codec error: {0}")]
    Codec(#[from] webchat_proto::wire::CodecError),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async transport for the bidirectional event socket.
///
/// Implementations own exactly one live logical connection and its
/// reconnection policy. Frame payloads are opaque to the transport beyond
/// the ack correlation ID — encryption and normalization happen at higher
/// layers.
pub trait Transport: Send + Sync {
    /// Send a frame without waiting for acknowledgment.
    ///
    /// `Ok(())` means the frame was handed to the connection, NOT that it
    /// was delivered.
    fn emit(
        &self,
        frame: ClientFrame,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Send a frame and wait for its [`SendAck`], correlated by the
    /// frame's temp ID.
    ///
    /// A [`TransportError::Timeout`] after `timeout` means the outcome is
    /// ambiguous: the server may still have persisted the message. Policy
    /// for that case belongs to the caller.
    fn emit_with_ack(
        &self,
        frame: ClientFrame,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<SendAck, TransportError>> + Send;

    /// Wait for the next transport event (lifecycle change or inbound
    /// frame).
    fn next_event(
        &self,
    ) -> impl std::future::Future<Output = Result<TransportEvent, TransportError>> + Send;

    /// Whether the transport currently has a live connection.
    fn is_connected(&self) -> bool;
}

/// Extract the correlation temp ID from a frame, if it has one.
pub(crate) const fn ack_correlation_id(
    frame: &ClientFrame,
) -> Option<&webchat_proto::message::TempId> {
    match frame {
        ClientFrame::SendMessage { temp_id, .. } => Some(temp_id),
        _ => None,
    }
}

/// Convenience for acks that carry no matching waiter.
pub(crate) fn describe_ack(ack: &SendAck) -> String {
    if ack.success {
        format!("success for {}", ack.temp_id)
    } else {
        format!(
            "failure for {}: {}",
            ack.temp_id,
            ack.error.as_deref().unwrap_or("unspecified")
        )
    }
}
