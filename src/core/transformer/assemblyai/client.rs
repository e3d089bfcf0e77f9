//! AssemblyAI streaming transformer.
//!
//! The session is only usable once the server has sent `Begin`, so connects
//! wait for it (bounded by [`BEGIN_TIMEOUT`]) before returning.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use super::AssemblyAiConfig;
use super::messages::{ControlMessage, ServerMessage};
use crate::core::audio::AudioConfig;
use crate::core::packet::Packet;
use crate::core::transformer::session::{
    Flow, ProviderProtocol, SessionOptions, SessionSlot, TranscriptEmitter, WsSession,
    build_request,
};
use crate::core::transformer::{EventSender, SpeechToText, Transformer, TransformerError};

// =============================================================================
// Constants
// =============================================================================

/// Upper bound on a single audio message. At 48kHz PCM16 this is ~2.5s.
const MAX_AUDIO_CHUNK_SIZE: usize = 256 * 1024;

const BEGIN_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Protocol
// =============================================================================

struct TurnProtocol {
    transcripts: TranscriptEmitter,
    begun: Option<oneshot::Sender<String>>,
}

#[async_trait]
impl ProviderProtocol for TurnProtocol {
    async fn on_message(
        &mut self,
        message: Message,
        events: &EventSender,
    ) -> Result<Flow, TransformerError> {
        match message {
            Message::Text(text) => match ServerMessage::parse(&text) {
                Ok(ServerMessage::Begin(begin)) => {
                    info!(
                        "AssemblyAI session started: {} (expires at: {})",
                        begin.id, begin.expires_at
                    );
                    if let Some(tx) = self.begun.take() {
                        let _ = tx.send(begin.id);
                    }
                }
                Ok(ServerMessage::Turn(turn)) => {
                    let confidence = turn.confidence();
                    self.transcripts
                        .emit(
                            events,
                            &turn.transcript,
                            turn.end_of_turn,
                            confidence,
                            turn.language,
                        )
                        .await;
                }
                Ok(ServerMessage::Termination(term)) => {
                    info!(
                        "AssemblyAI session terminated (duration: {}ms, normal: {})",
                        term.audio_duration_ms, term.terminated_normally
                    );
                    return Ok(Flow::Stop);
                }
                Ok(ServerMessage::Error(err)) => {
                    error!(
                        "AssemblyAI error{}: {}",
                        err.error_code
                            .as_ref()
                            .map(|c| format!(" ({c})"))
                            .unwrap_or_default(),
                        err.error
                    );
                    return Err(classify_error(err.error_code.as_deref(), err.error));
                }
                Ok(ServerMessage::Unknown(raw)) => {
                    debug!("Received unknown AssemblyAI message type: {}", raw);
                }
                Err(e) => warn!("Failed to parse AssemblyAI message: {}", e),
            },
            Message::Close(frame) => {
                info!("AssemblyAI WebSocket closed: {:?}", frame);
                return Ok(Flow::Stale);
            }
            Message::Binary(_) => debug!("Received unexpected binary message from AssemblyAI"),
            _ => {}
        }
        Ok(Flow::Continue)
    }

    fn close_message(&self) -> Option<Message> {
        serde_json::to_string(&ControlMessage::TERMINATE)
            .ok()
            .map(|json| Message::Text(json.into()))
    }
}

fn classify_error(code: Option<&str>, message: String) -> TransformerError {
    match code {
        Some("invalid_api_key") | Some("authentication_failed") => {
            TransformerError::Authentication(message)
        }
        Some("rate_limit_exceeded") | Some("rate_limit") => {
            TransformerError::Provider(format!("Rate limit exceeded: {message}"))
        }
        Some("invalid_audio") | Some("audio_error") => TransformerError::InvalidAudio(message),
        Some("session_timeout") | Some("timeout") => TransformerError::Timeout(message),
        _ => TransformerError::Provider(message),
    }
}

// =============================================================================
// Transformer
// =============================================================================

/// AssemblyAI v3 real-time transcription.
pub struct AssemblyAiStt {
    config: AssemblyAiConfig,
    events: EventSender,
    slot: SessionSlot,
    session_id: Option<String>,
}

impl AssemblyAiStt {
    pub fn new(config: AssemblyAiConfig, events: EventSender) -> Self {
        Self {
            config,
            events,
            slot: SessionSlot::new("AssemblyAI STT"),
            session_id: None,
        }
    }

    /// Provider session id from the last `Begin`.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    async fn session(&mut self) -> Result<&WsSession, TransformerError> {
        if self.slot.needs_connect()? {
            let url = self.config.websocket_url();
            // AssemblyAI takes the raw key, no scheme prefix.
            let request = build_request(&url, &[("Authorization", self.config.api_key.clone())])?;
            let (begun_tx, begun_rx) = oneshot::channel();
            let mut session = WsSession::connect(
                "AssemblyAI STT",
                request,
                TurnProtocol {
                    transcripts: TranscriptEmitter::new(&self.config.options),
                    begun: Some(begun_tx),
                },
                self.events.clone(),
                SessionOptions::default(),
            )
            .await?;

            match timeout(BEGIN_TIMEOUT, begun_rx).await {
                Ok(Ok(id)) => self.session_id = Some(id),
                Ok(Err(_)) => {
                    session.close().await;
                    return Err(TransformerError::Connection(
                        "Connection closed before session started".to_string(),
                    ));
                }
                Err(_) => {
                    session.close().await;
                    return Err(TransformerError::Connection(
                        "Connection timeout waiting for Begin message".to_string(),
                    ));
                }
            }
            self.slot.set(session);
        }
        self.slot.get()
    }
}

#[async_trait]
impl Transformer for AssemblyAiStt {
    async fn initialize(&mut self) -> Result<(), TransformerError> {
        self.session().await.map(|_| ())
    }

    async fn transform(&mut self, packet: Packet) -> Result<(), TransformerError> {
        match packet {
            Packet::Audio(chunk) => {
                if chunk.data.is_empty() {
                    return Ok(());
                }
                if chunk.data.len() > MAX_AUDIO_CHUNK_SIZE {
                    return Err(TransformerError::InvalidAudio(format!(
                        "Audio chunk size {} bytes exceeds maximum {} bytes",
                        chunk.data.len(),
                        MAX_AUDIO_CHUNK_SIZE
                    )));
                }
                self.session().await?.send(Message::Binary(chunk.data)).await
            }
            Packet::Text(_)
            | Packet::Flush { .. }
            | Packet::Interruption { .. }
            | Packet::Completion { .. }
            | Packet::Directive(_) => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), TransformerError> {
        self.slot.close().await;
        self.session_id = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "assemblyai-stt"
    }
}

impl SpeechToText for AssemblyAiStt {
    fn input_config(&self) -> AudioConfig {
        self.config.input
    }
}
