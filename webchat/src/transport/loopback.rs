//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels to simulate the event
//! socket. Created via [`LoopbackTransport::create`], which returns the
//! client-side transport plus a [`LoopbackServer`] handle tests use to
//! script the far end: receive client frames, answer (or drop) acks,
//! inject server frames, and sever or restore the link.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};

use webchat_proto::message::TempId;
use webchat_proto::wire::{ClientFrame, SendAck, ServerFrame};

use super::{Transport, TransportError, TransportEvent, ack_correlation_id, describe_ack};

/// Shared state between the client transport and the server handle.
struct Link {
    /// Whether the simulated connection is up.
    connected: AtomicBool,
    /// Waiters for acks, keyed by the correlation temp ID.
    pending_acks: parking_lot::Mutex<HashMap<TempId, oneshot::Sender<SendAck>>>,
    /// Channel feeding [`TransportEvent`]s to the client side.
    event_tx: mpsc::Sender<TransportEvent>,
}

/// In-process transport backed by `tokio::sync::mpsc` channels.
pub struct LoopbackTransport {
    /// Outgoing frames toward the scripted server.
    frames_tx: mpsc::Sender<ClientFrame>,
    /// Incoming transport events.
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    /// State shared with the server handle.
    link: Arc<Link>,
}

/// Scriptable far end of a [`LoopbackTransport`].
pub struct LoopbackServer {
    /// Frames the client has emitted.
    frames: Mutex<mpsc::Receiver<ClientFrame>>,
    /// State shared with the client transport.
    link: Arc<Link>,
}

impl LoopbackTransport {
    /// Create a connected transport/server pair.
    ///
    /// The `buffer` parameter controls channel capacity in each direction.
    #[must_use]
    pub fn create(buffer: usize) -> (Self, LoopbackServer) {
        let (frames_tx, frames_rx) = mpsc::channel(buffer);
        let (event_tx, event_rx) = mpsc::channel(buffer);

        let link = Arc::new(Link {
            connected: AtomicBool::new(true),
            pending_acks: parking_lot::Mutex::new(HashMap::new()),
            event_tx,
        });

        let transport = Self {
            frames_tx,
            events: Mutex::new(event_rx),
            link: Arc::clone(&link),
        };
        let server = LoopbackServer {
            frames: Mutex::new(frames_rx),
            link,
        };
        (transport, server)
    }
}

impl Transport for LoopbackTransport {
    async fn emit(&self, frame: ClientFrame) -> Result<(), TransportError> {
        if !self.link.connected.load(Ordering::Relaxed) {
            return Err(TransportError::NotConnected);
        }
        self.frames_tx
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn emit_with_ack(
        &self,
        frame: ClientFrame,
        timeout: Duration,
    ) -> Result<SendAck, TransportError> {
        let Some(temp_id) = ack_correlation_id(&frame).copied() else {
            return Err(TransportError::NotAckable);
        };

        let (tx, rx) = oneshot::channel();
        self.link.pending_acks.lock().insert(temp_id, tx);

        if let Err(e) = self.emit(frame).await {
            self.link.pending_acks.lock().remove(&temp_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => {
                self.link.pending_acks.lock().remove(&temp_id);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn next_event(&self) -> Result<TransportEvent, TransportError> {
        let mut events = self.events.lock().await;
        events.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Relaxed)
    }
}

impl LoopbackServer {
    /// Receive the next frame the client emitted, or `None` if the client
    /// transport was dropped.
    pub async fn recv_frame(&self) -> Option<ClientFrame> {
        self.frames.lock().await.recv().await
    }

    /// Inject a server frame. A `SendAck` with a registered waiter
    /// resolves that waiter; everything else (including unmatched late
    /// acks) is delivered as a transport event.
    pub async fn push_frame(&self, frame: ServerFrame) {
        if let ServerFrame::SendAck(ack) = &frame {
            let waiter = self.link.pending_acks.lock().remove(&ack.temp_id);
            if let Some(tx) = waiter {
                let _ = tx.send(ack.clone());
                return;
            }
            tracing::debug!(ack = %describe_ack(ack), "loopback ack without waiter, forwarding");
        }
        let _ = self.link.event_tx.send(TransportEvent::Frame(frame)).await;
    }

    /// Answer a pending send with an acknowledgment.
    pub async fn ack(&self, ack: SendAck) {
        self.push_frame(ServerFrame::SendAck(ack)).await;
    }

    /// Sever the link: subsequent emits fail with `NotConnected`, and
    /// waiters for in-flight acks are dropped (their sends become
    /// ambiguous). Emits a `Disconnected` event.
    pub async fn sever(&self) {
        self.link.connected.store(false, Ordering::Relaxed);
        self.link.pending_acks.lock().clear();
        let _ = self
            .link
            .event_tx
            .send(TransportEvent::Disconnected {
                reason: "link severed".into(),
            })
            .await;
    }

    /// Restore the link and emit a `Connected` event.
    pub async fn restore(&self) {
        self.link.connected.store(true, Ordering::Relaxed);
        let _ = self.link.event_tx.send(TransportEvent::Connected).await;
    }

    /// Emit the initial `Connected` event. Loopback links start connected,
    /// but orchestrator tests need the lifecycle event to drive the state
    /// machine.
    pub async fn announce_connected(&self) {
        let _ = self.link.event_tx.send(TransportEvent::Connected).await;
    }
}
