use std::time::Duration;

use async_trait::async_trait;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use super::messages::{ListenControl, ListenMessage, most_used_language};
use super::{DeepgramSttConfig, auth_header};
use crate::core::audio::AudioConfig;
use crate::core::packet::Packet;
use crate::core::transformer::session::{
    Flow, ProviderProtocol, SessionOptions, SessionSlot, TranscriptEmitter, WsSession,
    build_request,
};
use crate::core::transformer::{
    EventSender, SpeechToText, Transformer, TransformerError,
};

/// Deepgram drops listen sockets after ~10s without data.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Close code and reason Deepgram uses when it times out a stream.
const TIMEOUT_CLOSE_CODE: u16 = 1011;
const TIMEOUT_REASON: &str = "NET-0001";

pub(super) struct ListenProtocol {
    transcripts: TranscriptEmitter,
}

impl ListenProtocol {
    pub(super) fn new(config: &DeepgramSttConfig) -> Self {
        Self {
            transcripts: TranscriptEmitter::new(&config.options),
        }
    }
}

#[async_trait]
impl ProviderProtocol for ListenProtocol {
    async fn on_message(
        &mut self,
        message: Message,
        events: &EventSender,
    ) -> Result<Flow, TransformerError> {
        match message {
            Message::Text(text) => match ListenMessage::parse(&text) {
                Ok(ListenMessage::Results(results)) => {
                    if let Some(alt) = results.best_alternative() {
                        let language = most_used_language(&alt.languages);
                        self.transcripts
                            .emit(
                                events,
                                &alt.transcript,
                                results.is_final,
                                Some(alt.confidence as f32),
                                Some(language),
                            )
                            .await;
                    }
                }
                Ok(ListenMessage::Metadata) => debug!("Deepgram STT metadata received"),
                Ok(ListenMessage::UtteranceEnd) => debug!("Deepgram STT utterance end"),
                Ok(ListenMessage::SpeechStarted) => debug!("Deepgram STT speech started"),
                Ok(ListenMessage::Unknown(raw)) => {
                    debug!("Received unknown Deepgram STT message: {}", raw)
                }
                Err(e) => warn!("Failed to parse Deepgram STT message: {}", e),
            },
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    let code = u16::from(frame.code);
                    if code == TIMEOUT_CLOSE_CODE || frame.reason.as_str().contains(TIMEOUT_REASON) {
                        return Err(TransformerError::Timeout(format!(
                            "Deepgram closed the stream ({code}): {}",
                            frame.reason.as_str()
                        )));
                    }
                    info!("Deepgram STT closed ({}): {}", code, frame.reason.as_str());
                }
                return Ok(Flow::Stale);
            }
            Message::Binary(_) => debug!("Received unexpected binary message from Deepgram STT"),
            _ => {}
        }
        Ok(Flow::Continue)
    }

    fn close_message(&self) -> Option<Message> {
        serde_json::to_string(&ListenControl::CLOSE_STREAM)
            .ok()
            .map(|json| Message::Text(json.into()))
    }

    fn keepalive_message(&self) -> Option<Message> {
        serde_json::to_string(&ListenControl::KEEP_ALIVE)
            .ok()
            .map(|json| Message::Text(json.into()))
    }
}

/// Deepgram live transcription.
pub struct DeepgramStt {
    config: DeepgramSttConfig,
    events: EventSender,
    slot: SessionSlot,
}

impl DeepgramStt {
    pub fn new(config: DeepgramSttConfig, events: EventSender) -> Self {
        Self {
            config,
            events,
            slot: SessionSlot::new("Deepgram STT"),
        }
    }

    async fn open(&self) -> Result<WsSession, TransformerError> {
        let url = self.config.websocket_url()?;
        let request = build_request(&url, &[auth_header(&self.config.api_key)])?;
        WsSession::connect(
            "Deepgram STT",
            request,
            ListenProtocol::new(&self.config),
            self.events.clone(),
            SessionOptions {
                keepalive: Some(KEEPALIVE_INTERVAL),
                ..Default::default()
            },
        )
        .await
    }

    async fn session(&mut self) -> Result<&WsSession, TransformerError> {
        if self.slot.needs_connect()? {
            let session = self.open().await?;
            self.slot.set(session);
        }
        self.slot.get()
    }
}

#[async_trait]
impl Transformer for DeepgramStt {
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
        "deepgram-stt"
    }
}

impl SpeechToText for DeepgramStt {
    fn input_config(&self) -> AudioConfig {
        self.config.input
    }
}
