use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use super::messages::{
    CancelRequest, ExperimentalControls, GenerationRequest, OutputFormat, TtsResponse, Voice,
};
use super::{CartesiaTtsConfig, encoding_name};
use crate::core::audio::AudioConfig;
use crate::core::packet::Packet;
use crate::core::transformer::session::{
    Flow, ProviderProtocol, SessionOptions, SessionSlot, WsSession, build_request, emit,
};
use crate::core::transformer::{EventSender, TextToSpeech, Transformer, TransformerError};

struct TtsProtocol;

#[async_trait]
impl ProviderProtocol for TtsProtocol {
    async fn on_message(
        &mut self,
        message: Message,
        events: &EventSender,
    ) -> Result<Flow, TransformerError> {
        match message {
            Message::Text(text) => match serde_json::from_str::<TtsResponse>(&text) {
                Ok(TtsResponse::Chunk {
                    data, context_id, ..
                }) => match BASE64.decode(data.as_bytes()) {
                    Ok(audio) => emit(events, Packet::audio(context_id, audio)).await,
                    Err(e) => warn!("Dropping undecodable Cartesia chunk: {}", e),
                },
                Ok(TtsResponse::Done { context_id }) => {
                    emit(events, Packet::completion(context_id)).await;
                }
                Ok(TtsResponse::Timestamps { .. }) | Ok(TtsResponse::FlushDone { .. }) => {}
                Ok(TtsResponse::Error {
                    context_id,
                    error,
                    status_code,
                }) => {
                    let message = format!(
                        "Cartesia TTS error{} for context {:?}: {error}",
                        status_code.map(|c| format!(" ({c})")).unwrap_or_default(),
                        context_id
                    );
                    if error.to_lowercase().contains("timeout") {
                        return Err(TransformerError::Timeout(message));
                    }
                    return Err(TransformerError::Provider(message));
                }
                Err(e) => warn!("Failed to parse Cartesia TTS message: {}", e),
            },
            Message::Close(frame) => {
                info!("Cartesia TTS closed: {:?}", frame);
                return Ok(Flow::Stale);
            }
            _ => {}
        }
        Ok(Flow::Continue)
    }

    fn close_message(&self) -> Option<Message> {
        None
    }
}

/// Cartesia streaming synthesis over contexts.
///
/// Each utterance maps to one Cartesia context. Switching utterances
/// cancels the previous context before any new text is sent.
pub struct CartesiaTts {
    config: CartesiaTtsConfig,
    events: EventSender,
    slot: SessionSlot,
    context_id: Option<String>,
}

impl CartesiaTts {
    pub fn new(config: CartesiaTtsConfig, events: EventSender) -> Self {
        Self {
            config,
            events,
            slot: SessionSlot::new("Cartesia TTS"),
            context_id: None,
        }
    }

    fn generation(&self, context_id: &str, transcript: String, continue_: bool) -> GenerationRequest {
        GenerationRequest {
            model_id: self.config.model.clone(),
            context_id: context_id.to_string(),
            transcript,
            voice: Voice {
                mode: "id",
                id: self.config.voice_id.clone(),
            },
            output_format: OutputFormat {
                container: "raw",
                // Validated in CartesiaTtsConfig::from_options.
                encoding: encoding_name(self.config.output.format).unwrap_or("pcm_s16le"),
                sample_rate: self.config.output.sample_rate,
            },
            language: self.config.language.clone(),
            experimental_controls: ExperimentalControls {
                speed: self.config.speed.clone(),
                emotion: self.config.emotion.clone(),
            },
            continue_,
            add_timestamps: false,
        }
    }

    async fn session(&mut self) -> Result<&WsSession, TransformerError> {
        if self.slot.needs_connect()? {
            let request = build_request(&self.config.websocket_url(), &[])?;
            let session = WsSession::connect(
                "Cartesia TTS",
                request,
                TtsProtocol,
                self.events.clone(),
                SessionOptions::default(),
            )
            .await?;
            self.slot.set(session);
        }
        self.slot.get()
    }

    async fn send<T: Serialize + Sync>(&mut self, request: &T) -> Result<(), TransformerError> {
        let json = serde_json::to_string(request)
            .map_err(|e| TransformerError::Provider(format!("Failed to encode request: {e}")))?;
        self.session().await?.send_text(json).await
    }

    async fn switch_context(&mut self, context_id: &str) -> Result<(), TransformerError> {
        if self.context_id.as_deref() == Some(context_id) {
            return Ok(());
        }
        if let Some(previous) = self.context_id.replace(context_id.to_string()) {
            debug!("Cancelling Cartesia context {}", previous);
            self.send(&CancelRequest::new(previous)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transformer for CartesiaTts {
    async fn initialize(&mut self) -> Result<(), TransformerError> {
        self.session().await.map(|_| ())
    }

    async fn transform(&mut self, packet: Packet) -> Result<(), TransformerError> {
        match packet {
            Packet::Text(chunk) => {
                self.switch_context(&chunk.context_id).await?;
                if chunk.text.is_empty() {
                    return Ok(());
                }
                let request = self.generation(&chunk.context_id, chunk.text, true);
                self.send(&request).await
            }
            Packet::Flush { context_id } => {
                self.switch_context(&context_id).await?;
                let request = self.generation(&context_id, String::new(), false);
                self.send(&request).await
            }
            Packet::Interruption { .. } => {
                if let Some(previous) = self.context_id.take() {
                    self.send(&CancelRequest::new(previous)).await?;
                }
                Ok(())
            }
            Packet::Audio(_) | Packet::Completion { .. } | Packet::Directive(_) => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), TransformerError> {
        self.context_id = None;
        self.slot.close().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cartesia-tts"
    }
}

impl TextToSpeech for CartesiaTts {
    fn output_config(&self) -> AudioConfig {
        self.config.output
    }
}
