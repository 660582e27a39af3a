//! WebSocket transport for the `WebChat` event channel.
//!
//! Implements the [`Transport`] trait over a WebSocket connection. A
//! background supervisor task owns the connection lifecycle: it
//! establishes the socket, runs the read loop, and on disconnect applies
//! exponential backoff with jitter before reconnecting. After
//! `max_attempts` consecutive failures it emits a terminal
//! [`TransportEvent::ConnectionFailed`] and stops.
//!
//! Acknowledgments are correlated by temp ID: `emit_with_ack` registers a
//! one-shot waiter that the read loop resolves when the matching
//! `send_ack` frame arrives. Acks without a waiter (for example after an
//! ambiguous timeout) are forwarded as ordinary events so higher layers
//! can still reconcile them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use webchat_proto::message::TempId;
use webchat_proto::wire::{self, ClientFrame, SendAck, ServerFrame};

use crate::config::ReconnectConfig;

use super::{Transport, TransportError, TransportEvent, ack_correlation_id, describe_ack};

/// Type alias for the write half of a WebSocket connection.
type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsStream =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// State shared between the public handle and the supervisor task.
struct Shared {
    /// The socket URL to (re)connect to.
    url: String,
    /// Reconnect policy.
    config: ReconnectConfig,
    /// Write half of the live connection, when one exists.
    writer: Mutex<Option<WsSink>>,
    /// Whether a connection is currently live.
    connected: AtomicBool,
    /// Waiters for acks, keyed by correlation temp ID.
    pending_acks: parking_lot::Mutex<HashMap<TempId, oneshot::Sender<SendAck>>>,
    /// Channel feeding events to `next_event`.
    event_tx: mpsc::Sender<TransportEvent>,
}

impl Shared {
    /// Drop all ack waiters; their receivers observe a closed channel.
    fn fail_pending_acks(&self) {
        self.pending_acks.lock().clear();
    }
}

/// WebSocket transport implementing [`Transport`].
///
/// Created via [`SocketTransport::connect`], which validates the URL and
/// spawns the connection supervisor. Connection progress is reported
/// through [`Transport::next_event`] — the constructor does not wait for
/// the socket to come up.
pub struct SocketTransport {
    /// Incoming transport events.
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    /// State shared with the supervisor.
    shared: Arc<Shared>,
    /// The supervisor task, aborted on close/drop.
    supervisor: tokio::task::JoinHandle<()>,
}

impl SocketTransport {
    /// Validate the URL and start the connection supervisor.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] if `url` does not parse or
    /// is not a `ws`/`wss` URL. Connection failures are NOT errors here —
    /// they surface as lifecycle events.
    pub fn connect(url: &str, config: ReconnectConfig) -> Result<Self, TransportError> {
        let parsed =
            url::Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(TransportError::InvalidUrl(format!(
                "{url}: expected ws:// or wss:// scheme"
            )));
        }

        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let shared = Arc::new(Shared {
            url: url.to_string(),
            config,
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            pending_acks: parking_lot::Mutex::new(HashMap::new()),
            event_tx,
        });

        let supervisor = tokio::spawn(supervisor_loop(Arc::clone(&shared)));

        Ok(Self {
            events: Mutex::new(event_rx),
            shared,
            supervisor,
        })
    }

    /// Stop the supervisor and drop the connection. Idempotent.
    pub fn close(&self) {
        self.supervisor.abort();
        self.shared.connected.store(false, Ordering::Relaxed);
        self.shared.fail_pending_acks();
    }

    /// The socket URL this transport targets.
    pub fn url(&self) -> &str {
        &self.shared.url
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

impl Transport for SocketTransport {
    async fn emit(&self, frame: ClientFrame) -> Result<(), TransportError> {
        let text = wire::encode(&frame)?;

        let mut writer = self.shared.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        sink.send(Message::Text(text.into())).await.map_err(|e| {
            tracing::warn!(err = %e, "socket send failed");
            self.shared.connected.store(false, Ordering::Relaxed);
            TransportError::ConnectionClosed
        })
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
        self.shared.pending_acks.lock().insert(temp_id, tx);

        if let Err(e) = self.emit(frame).await {
            self.shared.pending_acks.lock().remove(&temp_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => {
                self.shared.pending_acks.lock().remove(&temp_id);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn next_event(&self) -> Result<TransportEvent, TransportError> {
        let mut events = self.events.lock().await;
        events.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }
}

/// Compute the backoff delay for a reconnect attempt.
///
/// `exponent` is 0-based: the first retry waits `base_delay`, each
/// subsequent one multiplies by `backoff_factor`, and jitter spreads the
/// result by up to ±`jitter` to avoid thundering-herd reconnects.
pub(crate) fn reconnect_delay(config: &ReconnectConfig, exponent: u32) -> Duration {
    let capped = exponent.min(30);
    let raw = config
        .base_delay
        .mul_f64(config.backoff_factor.powi(i32::try_from(capped).unwrap_or(30)));
    let spread = 1.0 + config.jitter * (rand::random::<f64>() * 2.0 - 1.0);
    raw.mul_f64(spread.max(0.0))
}

/// Supervisor task owning the connection lifecycle.
///
/// Connect, read until the connection drops, back off, repeat. Exits
/// after `max_attempts` consecutive failures (terminal
/// `ConnectionFailed`) or when the event receiver is dropped.
async fn supervisor_loop(shared: Arc<Shared>) {
    let mut attempt: u32 = 0;
    loop {
        let connect = tokio::time::timeout(
            shared.config.connect_timeout,
            connect_async(shared.url.as_str()),
        )
        .await;

        match connect {
            Ok(Ok((ws_stream, _response))) => {
                attempt = 0;
                let (sink, stream) = ws_stream.split();
                *shared.writer.lock().await = Some(sink);
                shared.connected.store(true, Ordering::Relaxed);
                tracing::info!(url = %shared.url, "socket connected");
                if shared.event_tx.send(TransportEvent::Connected).await.is_err() {
                    return; // transport dropped
                }

                let reason = read_loop(stream, &shared).await;

                shared.connected.store(false, Ordering::Relaxed);
                *shared.writer.lock().await = None;
                shared.fail_pending_acks();
                tracing::warn!(url = %shared.url, reason = %reason, "socket disconnected");
                if shared
                    .event_tx
                    .send(TransportEvent::Disconnected { reason })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(url = %shared.url, err = %e, "socket connect failed");
            }
            Err(_) => {
                tracing::warn!(url = %shared.url, "socket connect timed out");
            }
        }

        attempt += 1;
        if attempt > shared.config.max_attempts {
            tracing::error!(
                url = %shared.url,
                attempts = shared.config.max_attempts,
                "reconnect attempts exhausted, giving up"
            );
            let _ = shared.event_tx.send(TransportEvent::ConnectionFailed).await;
            return;
        }

        let delay = reconnect_delay(&shared.config, attempt - 1);
        tracing::info!(
            url = %shared.url,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        if shared
            .event_tx
            .send(TransportEvent::Reconnecting { attempt, delay })
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(delay).await;
    }
}

/// Read frames until the connection drops. Returns the drop reason.
///
/// Acks with a registered waiter resolve that waiter; everything else is
/// forwarded as a transport event. Malformed frames are logged and
/// skipped — bad data never disconnects the socket.
async fn read_loop(mut stream: WsStream, shared: &Shared) -> String {
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match wire::decode::<ServerFrame>(text.as_str()) {
                Ok(ServerFrame::SendAck(ack)) => {
                    let waiter = shared.pending_acks.lock().remove(&ack.temp_id);
                    if let Some(tx) = waiter {
                        let _ = tx.send(ack);
                    } else {
                        tracing::debug!(
                            ack = %describe_ack(&ack),
                            "ack without waiter, forwarding for reconciliation"
                        );
                        if shared
                            .event_tx
                            .send(TransportEvent::Frame(ServerFrame::SendAck(ack)))
                            .await
                            .is_err()
                        {
                            return "event receiver dropped".into();
                        }
                    }
                }
                Ok(frame) => {
                    if shared
                        .event_tx
                        .send(TransportEvent::Frame(frame))
                        .await
                        .is_err()
                    {
                        return "event receiver dropped".into();
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed server frame, skipping");
                }
            },
            Ok(Message::Close(_)) => return "closed by server".into(),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {
                // Control and binary frames carry nothing for us.
            }
            Err(e) => return format!("socket error: {e}"),
        }
    }
    "stream ended".into()
}
