//! Shared WebSocket session runner for streaming providers.
//!
//! Every provider connection is one spawned task that owns the socket and
//! multiplexes four sources:
//!
//! ```text
//! transform() ──▶ outbound (mpsc) ──▶ ┌──────────────┐ ──▶ provider
//!                 keepalive tick  ──▶ │ session task │
//!                 shutdown (oneshot)▶ └──────┬───────┘ ◀── provider
//!                                            │
//!                                   ProviderProtocol::on_message
//!                                            │
//!                                            ▼
//!                                 TransformerEvent (mpsc)
//! ```
//!
//! When the loop exits for any reason the session is marked disconnected.
//! Owners check [`WsSession::is_connected`] before each send and reconnect
//! when the session has gone stale. Only [`Flow::Stale`] and timeouts end a
//! session silently. Transport errors, and connections that drop without a
//! close frame, are reported as [`TransformerEvent::Fatal`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::{EventSender, ProviderOptions, TransformerError, TransformerEvent};
use crate::core::packet::{InterruptionSource, Packet, TextChunk};

// =============================================================================
// Constants
// =============================================================================

/// Per-message idle timeout. Resets after each received message.
pub(crate) const WS_MESSAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace period for the session task to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Outbound queue depth; bounded for backpressure.
const OUTBOUND_CAPACITY: usize = 64;

// =============================================================================
// Protocol Seam
// =============================================================================

/// What the session loop does after a provider message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// The provider ended the session on purpose.
    Stop,
    /// The provider dropped the session; reconnect on next use.
    Stale,
}

/// Provider-specific half of a session: decoding inbound frames into events.
#[async_trait]
pub(crate) trait ProviderProtocol: Send + 'static {
    /// Handle one inbound frame. Errors other than timeouts are fatal.
    async fn on_message(
        &mut self,
        message: Message,
        events: &EventSender,
    ) -> Result<Flow, TransformerError>;

    /// Sent before the close frame on graceful shutdown.
    fn close_message(&self) -> Option<Message>;

    fn keepalive_message(&self) -> Option<Message> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionOptions {
    pub idle_timeout: Duration,
    pub keepalive: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            idle_timeout: WS_MESSAGE_TIMEOUT,
            keepalive: None,
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// A live provider connection.
pub(crate) struct WsSession {
    name: &'static str,
    outbound: mpsc::Sender<Message>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
}

impl WsSession {
    /// Perform the WebSocket handshake and spawn the session task.
    pub async fn connect<P: ProviderProtocol>(
        name: &'static str,
        request: Request<()>,
        protocol: P,
        events: EventSender,
        options: SessionOptions,
    ) -> Result<Self, TransformerError> {
        let (ws_stream, _response) = connect_async(request)
            .await
            .map_err(|e| classify_connect_error(name, e))?;

        info!("Connected to {} WebSocket", name);

        let (outbound_tx, outbound_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let connected = Arc::new(AtomicBool::new(true));

        let handle = tokio::spawn(run_session(
            name,
            ws_stream,
            protocol,
            events,
            outbound_rx,
            shutdown_rx,
            connected.clone(),
            options,
        ));

        Ok(Self {
            name,
            outbound: outbound_tx,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            connected,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && self.shutdown_tx.is_some()
    }

    pub async fn send(&self, message: Message) -> Result<(), TransformerError> {
        if !self.is_connected() {
            return Err(TransformerError::Connection(format!(
                "Not connected to {}",
                self.name
            )));
        }
        self.outbound.send(message).await.map_err(|_| {
            TransformerError::Network(format!("{} session task has stopped", self.name))
        })
    }

    pub async fn send_text(&self, json: String) -> Result<(), TransformerError> {
        self.send(Message::Text(json.into())).await
    }

    /// Signal shutdown and wait for the task to drain. Idempotent.
    pub async fn close(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.handle.take()
            && timeout(SHUTDOWN_GRACE, handle).await.is_err()
        {
            warn!("{} session did not shut down in time", self.name);
        }
        self.connected.store(false, Ordering::Release);
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

/// Holds a provider session across reconnects.
///
/// Once closed by its owner the slot refuses further use.
pub(crate) struct SessionSlot {
    name: &'static str,
    session: Option<WsSession>,
    closed: bool,
}

impl SessionSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            session: None,
            closed: false,
        }
    }

    /// `Ok(true)` when the owner must (re)connect before sending.
    pub fn needs_connect(&self) -> Result<bool, TransformerError> {
        if self.closed {
            return Err(TransformerError::Closed);
        }
        Ok(!self.session.as_ref().is_some_and(WsSession::is_connected))
    }

    /// Whether a previous session existed and has gone stale.
    pub fn is_stale(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_connected())
    }

    pub fn set(&mut self, session: WsSession) {
        if self.is_stale() {
            info!("Reconnected to {}", self.name);
        }
        self.session = Some(session);
    }

    pub fn get(&self) -> Result<&WsSession, TransformerError> {
        if self.closed {
            return Err(TransformerError::Closed);
        }
        self.session
            .as_ref()
            .ok_or_else(|| TransformerError::Connection(format!("{} is not initialized", self.name)))
    }

    pub async fn close(&mut self) {
        self.closed = true;
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}

type ProviderStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[allow(clippy::too_many_arguments)]
async fn run_session<P: ProviderProtocol>(
    name: &'static str,
    ws_stream: ProviderStream,
    mut protocol: P,
    events: EventSender,
    mut outbound_rx: mpsc::Receiver<Message>,
    mut shutdown_rx: oneshot::Receiver<()>,
    connected: Arc<AtomicBool>,
    options: SessionOptions,
) {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut keepalive = options.keepalive.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut saw_close = false;

    loop {
        tokio::select! {
            Some(message) = outbound_rx.recv() => {
                if let Err(e) = ws_sink.send(message).await {
                    let err = TransformerError::Network(format!("Failed to send to {name}: {e}"));
                    error!("{}", err);
                    let _ = events.send(TransformerEvent::Fatal(err)).await;
                    break;
                }
            }

            _ = tick(&mut keepalive) => {
                if let Some(message) = protocol.keepalive_message() {
                    debug!("Sending keepalive to {}", name);
                    if let Err(e) = ws_sink.send(message).await {
                        warn!("Failed to send keepalive to {}: {}", name, e);
                    }
                }
            }

            message = timeout(options.idle_timeout, ws_stream.next()) => {
                match message {
                    Ok(Some(Ok(msg))) => {
                        saw_close |= matches!(msg, Message::Close(_));
                        match protocol.on_message(msg, &events).await {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Stop) => {
                                info!("{} session ended by provider", name);
                                break;
                            }
                            Ok(Flow::Stale) => {
                                info!("{} session went stale; will reconnect on next use", name);
                                break;
                            }
                            Err(e) if e.is_timeout() => {
                                warn!("{} reported a timeout; will reconnect on next use: {}", name, e);
                                break;
                            }
                            Err(e) => {
                                error!("{} streaming error: {}", name, e);
                                let _ = events.send(TransformerEvent::Fatal(e)).await;
                                break;
                            }
                        }
                    }
                    Ok(Some(Err(e))) => {
                        let err = TransformerError::Network(format!("{name} WebSocket error: {e}"));
                        error!("{}", err);
                        let _ = events.send(TransformerEvent::Fatal(err)).await;
                        break;
                    }
                    Ok(None) if saw_close => {
                        info!("{} WebSocket stream ended", name);
                        break;
                    }
                    Ok(None) => {
                        let err = TransformerError::Network(format!(
                            "{name} connection dropped without a close frame"
                        ));
                        error!("{}", err);
                        let _ = events.send(TransformerEvent::Fatal(err)).await;
                        break;
                    }
                    Err(_elapsed) => {
                        warn!(
                            "{} idle for {:?}; will reconnect on next use",
                            name, options.idle_timeout
                        );
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("Received shutdown signal for {}", name);
                if let Some(message) = protocol.close_message() {
                    let _ = ws_sink.send(message).await;
                }
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    connected.store(false, Ordering::Release);
    info!("{} WebSocket connection closed", name);
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn classify_connect_error(
    name: &str,
    err: tokio_tungstenite::tungstenite::Error,
) -> TransformerError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            TransformerError::Authentication(format!(
                "{name} rejected credentials (HTTP {})",
                response.status()
            ))
        }
        other => TransformerError::Connection(format!("Failed to connect to {name}: {other}")),
    }
}

// =============================================================================
// Request Helpers
// =============================================================================

/// Provider URL: the `endpoint` option replaces `default_base` entirely.
pub(crate) fn provider_url(
    default_base: &str,
    options: &ProviderOptions,
) -> Result<Url, TransformerError> {
    let base = options.endpoint().unwrap_or(default_base);
    Url::parse(base)
        .map_err(|e| TransformerError::Configuration(format!("Invalid endpoint '{base}': {e}")))
}

/// Build a WebSocket upgrade request for `url` with extra headers.
pub(crate) fn build_request(
    url: &Url,
    headers: &[(&str, String)],
) -> Result<Request<()>, TransformerError> {
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => {
            return Err(TransformerError::Configuration(format!(
                "URL has no host: {url}"
            )));
        }
    };

    let mut builder = Request::builder()
        .method("GET")
        .uri(url.as_str())
        .header("Host", host)
        .header("Upgrade", "websocket")
        .header("Connection", "upgrade")
        .header("Sec-WebSocket-Key", generate_key())
        .header("Sec-WebSocket-Version", "13");
    for (name, value) in headers {
        builder = builder.header(*name, value.as_str());
    }

    builder
        .body(())
        .map_err(|e| TransformerError::Connection(format!("Failed to create WebSocket request: {e}")))
}

/// Send a packet to the consumer. A dropped receiver is not an error here:
/// the owner is shutting down and will close the session.
pub(crate) async fn emit(events: &EventSender, packet: Packet) {
    if events.send(TransformerEvent::Packet(packet)).await.is_err() {
        debug!("Event receiver dropped; discarding packet");
    }
}

// =============================================================================
// Transcript Emission
// =============================================================================

/// Turns provider transcripts into `Interruption` + `Text` packets.
///
/// Each utterance gets its own context id, rotated after a final result.
/// When `listen.threshold` is set, results below it are demoted to interim.
#[derive(Debug)]
pub(crate) struct TranscriptEmitter {
    utterance_id: String,
    threshold: Option<f32>,
}

impl TranscriptEmitter {
    pub fn new(options: &ProviderOptions) -> Self {
        Self {
            utterance_id: Uuid::new_v4().to_string(),
            threshold: options
                .get("listen.threshold")
                .and_then(|v| v.parse::<f32>().ok()),
        }
    }

    /// Build the packets for one transcript. Empty transcripts yield nothing.
    pub fn packets(
        &mut self,
        text: &str,
        is_final: bool,
        confidence: Option<f32>,
        language: Option<String>,
    ) -> Vec<Packet> {
        if text.is_empty() {
            return Vec::new();
        }

        let below_threshold = match (self.threshold, confidence) {
            (Some(threshold), Some(confidence)) => confidence < threshold,
            _ => false,
        };
        let is_final = is_final && !below_threshold;

        let packets = vec![
            Packet::interruption(InterruptionSource::Word),
            Packet::Text(TextChunk {
                context_id: self.utterance_id.clone(),
                text: text.to_string(),
                is_final,
                confidence,
                language,
            }),
        ];

        if is_final {
            self.utterance_id = Uuid::new_v4().to_string();
        }
        packets
    }

    pub async fn emit(
        &mut self,
        events: &EventSender,
        text: &str,
        is_final: bool,
        confidence: Option<f32>,
        language: Option<String>,
    ) {
        for packet in self.packets(text, is_final, confidence, language) {
            emit(events, packet).await;
        }
    }
}
