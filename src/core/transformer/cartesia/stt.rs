use async_trait::async_trait;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use super::CartesiaSttConfig;
use super::messages::SttResponse;
use crate::core::audio::AudioConfig;
use crate::core::packet::Packet;
use crate::core::transformer::session::{
    Flow, ProviderProtocol, SessionOptions, SessionSlot, TranscriptEmitter, WsSession,
    build_request,
};
use crate::core::transformer::{EventSender, SpeechToText, Transformer, TransformerError};

struct SttProtocol {
    transcripts: TranscriptEmitter,
}

#[async_trait]
impl ProviderProtocol for SttProtocol {
    async fn on_message(
        &mut self,
        message: Message,
        events: &EventSender,
    ) -> Result<Flow, TransformerError> {
        match message {
            Message::Text(text) => match serde_json::from_str::<SttResponse>(&text) {
                Ok(SttResponse::Transcript {
                    text,
                    is_final,
                    language,
                    ..
                }) => {
                    self.transcripts
                        .emit(events, &text, is_final, None, language)
                        .await;
                }
                Ok(SttResponse::FlushDone) => debug!("Cartesia STT flush done"),
                Ok(SttResponse::Done) => {
                    info!("Cartesia STT session done");
                    return Ok(Flow::Stop);
                }
                Ok(SttResponse::Error { message }) => {
                    if message.to_lowercase().contains("timeout") {
                        return Err(TransformerError::Timeout(message));
                    }
                    return Err(TransformerError::Provider(format!(
                        "Cartesia STT error: {message}"
                    )));
                }
                Err(e) => warn!("Failed to parse Cartesia STT message: {}", e),
            },
            Message::Close(frame) => {
                info!("Cartesia STT closed: {:?}", frame);
                return Ok(Flow::Stale);
            }
            _ => {}
        }
        Ok(Flow::Continue)
    }

    fn close_message(&self) -> Option<Message> {
        Some(Message::Text("done".into()))
    }
}

/// Cartesia streaming transcription.
pub struct CartesiaStt {
    config: CartesiaSttConfig,
    events: EventSender,
    slot: SessionSlot,
}

impl CartesiaStt {
    pub fn new(config: CartesiaSttConfig, events: EventSender) -> Self {
        Self {
            config,
            events,
            slot: SessionSlot::new("Cartesia STT"),
        }
    }

    async fn session(&mut self) -> Result<&WsSession, TransformerError> {
        if self.slot.needs_connect()? {
            let url = self.config.websocket_url()?;
            let request = build_request(&url, &[])?;
            let session = WsSession::connect(
                "Cartesia STT",
                request,
                SttProtocol {
                    transcripts: TranscriptEmitter::new(&self.config.options),
                },
                self.events.clone(),
                SessionOptions::default(),
            )
            .await?;
            self.slot.set(session);
        }
        self.slot.get()
    }
}

#[async_trait]
impl Transformer for CartesiaStt {
    async fn initialize(&mut self) -> Result<(), TransformerError> {
        self.session().await.map(|_| ())
    }

    async fn transform(&mut self, packet: Packet) -> Result<(), TransformerError> {
        match packet {
            Packet::Audio(chunk) => {
                if chunk.data.is_empty() {
                    return Ok(());
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
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cartesia-stt"
    }
}

impl SpeechToText for CartesiaStt {
    fn input_config(&self) -> AudioConfig {
        self.config.input
    }
}
