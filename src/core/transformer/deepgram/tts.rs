use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use super::messages::{SpeakRequest, SpeakResponse};
use super::{DeepgramTtsConfig, auth_header};
use crate::core::audio::AudioConfig;
use crate::core::packet::Packet;
use crate::core::transformer::session::{
    Flow, ProviderProtocol, SessionOptions, SessionSlot, WsSession, build_request, emit,
};
use crate::core::transformer::{EventSender, TextToSpeech, Transformer, TransformerError};

/// Utterance bookkeeping shared between the transformer and its session task.
///
/// Deepgram audio frames carry no context id, so the active context is
/// tracked here. While a `Clear` is in flight, late audio is dropped.
#[derive(Debug, Default)]
struct SpeakState {
    context_id: Option<String>,
    clearing: bool,
}

type SharedSpeakState = Arc<Mutex<SpeakState>>;

struct SpeakProtocol {
    state: SharedSpeakState,
}

#[async_trait]
impl ProviderProtocol for SpeakProtocol {
    async fn on_message(
        &mut self,
        message: Message,
        events: &EventSender,
    ) -> Result<Flow, TransformerError> {
        match message {
            Message::Binary(data) => {
                let context_id = {
                    let state = self.state.lock();
                    if state.clearing {
                        None
                    } else {
                        state.context_id.clone()
                    }
                };
                match context_id {
                    Some(context_id) => emit(events, Packet::audio(context_id, data)).await,
                    None => debug!("Dropping {} bytes of cleared Deepgram audio", data.len()),
                }
            }
            Message::Text(text) => match serde_json::from_str::<SpeakResponse>(&text) {
                Ok(SpeakResponse::Flushed { .. }) => {
                    let context_id = self.state.lock().context_id.clone();
                    if let Some(context_id) = context_id {
                        emit(events, Packet::completion(context_id)).await;
                    }
                }
                Ok(SpeakResponse::Cleared { .. }) => {
                    self.state.lock().clearing = false;
                }
                Ok(SpeakResponse::Metadata { request_id }) => {
                    debug!("Deepgram TTS session metadata: {:?}", request_id);
                }
                Ok(SpeakResponse::Warning { description, code }) => {
                    warn!("Deepgram TTS warning {:?}: {}", code, description);
                }
                Ok(SpeakResponse::Error { description, code }) => {
                    let message = format!("Deepgram TTS error {code:?}: {description}");
                    if description.to_lowercase().contains("timeout") {
                        return Err(TransformerError::Timeout(message));
                    }
                    return Err(TransformerError::Provider(message));
                }
                Err(e) => warn!("Failed to parse Deepgram TTS message: {}", e),
            },
            Message::Close(frame) => {
                info!("Deepgram TTS closed: {:?}", frame);
                return Ok(Flow::Stale);
            }
            _ => {}
        }
        Ok(Flow::Continue)
    }

    fn close_message(&self) -> Option<Message> {
        serde_json::to_string(&SpeakRequest::Close)
            .ok()
            .map(|json| Message::Text(json.into()))
    }
}

/// Deepgram streaming synthesis.
pub struct DeepgramTts {
    config: DeepgramTtsConfig,
    events: EventSender,
    slot: SessionSlot,
    state: SharedSpeakState,
}

impl DeepgramTts {
    pub fn new(config: DeepgramTtsConfig, events: EventSender) -> Self {
        Self {
            config,
            events,
            slot: SessionSlot::new("Deepgram TTS"),
            state: Arc::new(Mutex::new(SpeakState::default())),
        }
    }

    async fn open(&self) -> Result<WsSession, TransformerError> {
        let url = self.config.websocket_url()?;
        let request = build_request(&url, &[auth_header(&self.config.api_key)])?;
        WsSession::connect(
            "Deepgram TTS",
            request,
            SpeakProtocol {
                state: self.state.clone(),
            },
            self.events.clone(),
            SessionOptions::default(),
        )
        .await
    }

    async fn session(&mut self) -> Result<&WsSession, TransformerError> {
        if self.slot.needs_connect()? {
            let session = self.open().await?;
            // A fresh socket has nothing to clear.
            self.state.lock().clearing = false;
            self.slot.set(session);
        }
        self.slot.get()
    }

    async fn send(&mut self, request: SpeakRequest) -> Result<(), TransformerError> {
        let json = serde_json::to_string(&request)
            .map_err(|e| TransformerError::Provider(format!("Failed to encode request: {e}")))?;
        self.session().await?.send_text(json).await
    }

    /// Make `context_id` current, clearing the previous utterance if any.
    async fn switch_context(&mut self, context_id: &str) -> Result<(), TransformerError> {
        let needs_clear = {
            let mut state = self.state.lock();
            if state.context_id.as_deref() == Some(context_id) {
                return Ok(());
            }
            let had_context = state.context_id.replace(context_id.to_string()).is_some();
            if had_context {
                state.clearing = true;
            }
            had_context
        };
        if needs_clear {
            self.send(SpeakRequest::Clear).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transformer for DeepgramTts {
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
                self.send(SpeakRequest::Speak { text: chunk.text }).await
            }
            Packet::Flush { context_id } => {
                self.switch_context(&context_id).await?;
                self.send(SpeakRequest::Flush).await
            }
            Packet::Interruption { .. } => {
                let had_context = {
                    let mut state = self.state.lock();
                    let had = state.context_id.take().is_some();
                    if had {
                        state.clearing = true;
                    }
                    had
                };
                if had_context {
                    self.send(SpeakRequest::Clear).await?;
                }
                Ok(())
            }
            Packet::Audio(_) | Packet::Completion { .. } | Packet::Directive(_) => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), TransformerError> {
        self.slot.close().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "deepgram-tts"
    }
}

impl TextToSpeech for DeepgramTts {
    fn output_config(&self) -> AudioConfig {
        self.config.output
    }
}
