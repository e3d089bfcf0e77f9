//! Conversation orchestrator.
//!
//! [`Talking`] drives one call end to end. It reads the carrier
//! [`Streamer`], connects a speech-to-text and a text-to-speech transformer
//! once the call is configured, and runs a pump task that turns provider
//! events into carrier packets.
//!
//! ```text
//! Uninitialized ──configure──▶ Configuring ──connected──▶ Active
//!        │                          ▲                       │
//!        │                          └──── reconfigure ──────┤
//!        └─────────────── end of stream / error ────────────┴──▶ Disconnected
//! ```
//!
//! Reconfiguration always tears down both transformers and builds new ones.

mod factory;
mod handler;
mod resolver;
#[cfg(test)]
mod tests;

pub use factory::{ProviderFactory, TransformerFactory};
pub use handler::{ConversationHandler, EchoResponder, Speaker, TranscriptRelay};
pub use resolver::{AssistantProfile, AssistantResolver, StaticAssistants};

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::audio::{AudioConfig, AudioError, AudioResampler};
use crate::core::packet::{Packet, Role};
use crate::core::recorder::CallRecorder;
use crate::core::streamer::{CallConfiguration, InboundEvent, StreamError, Streamer};
use crate::core::telephony::TelephonyError;
use crate::core::transformer::{
    EVENT_CHANNEL_CAPACITY, SpeechToText, TextToSpeech, TransformerError, TransformerEvent,
};

pub(crate) type SharedStt = Arc<tokio::sync::Mutex<Box<dyn SpeechToText>>>;
pub(crate) type SharedTts = Arc<tokio::sync::Mutex<Box<dyn TextToSpeech>>>;

#[derive(Debug, thiserror::Error)]
pub enum TalkingError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Transformer(#[from] TransformerError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Credential(#[from] TelephonyError),
    #[error("Conversation handler failed: {0}")]
    Handler(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalkingState {
    Uninitialized,
    Configuring,
    Active,
    Disconnected,
}

impl std::fmt::Display for TalkingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TalkingState::Uninitialized => "uninitialized",
            TalkingState::Configuring => "configuring",
            TalkingState::Active => "active",
            TalkingState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Shared collaborators of every call.
#[derive(Clone)]
pub struct CallServices {
    pub factory: Arc<dyn TransformerFactory>,
    pub assistants: Arc<dyn AssistantResolver>,
    pub handler: Arc<dyn ConversationHandler>,
    /// Directory for per-call WAV recordings. `None` disables recording.
    pub recording_dir: Option<PathBuf>,
}

/// Transformers and pump of one configuration.
struct Connection {
    stt: SharedStt,
    tts: SharedTts,
    stt_input: AudioConfig,
    speaker: Speaker,
    pump_cancel: CancellationToken,
    pump: JoinHandle<()>,
    closed: AtomicBool,
}

impl Connection {
    /// Stop the pump and close both transformers. Runs once.
    async fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pump_cancel.cancel();
        if let Err(e) = (&mut self.pump).await {
            warn!(error = %e, "Output pump ended abnormally");
        }
        if let Err(e) = self.stt.lock().await.close().await {
            warn!(error = %e, "Failed to close speech-to-text");
        }
        if let Err(e) = self.tts.lock().await.close().await {
            warn!(error = %e, "Failed to close text-to-speech");
        }
    }
}

/// Drives one call.
pub struct Talking {
    streamer: Arc<dyn Streamer>,
    services: CallServices,
    state: TalkingState,
    connection: Option<Connection>,
    recorder: Option<Arc<CallRecorder>>,
    resampler: AudioResampler,
    fatal: Arc<Mutex<Option<TransformerError>>>,
    disconnected: AtomicBool,
}

impl Talking {
    pub fn new(streamer: Arc<dyn Streamer>, services: CallServices) -> Self {
        let recorder = services.recording_dir.as_ref().map(|dir| {
            Arc::new(CallRecorder::new(
                dir.clone(),
                streamer.identity().conversation_id.clone(),
            ))
        });
        Self {
            streamer,
            services,
            state: TalkingState::Uninitialized,
            connection: None,
            recorder,
            resampler: AudioResampler::new(),
            fatal: Arc::new(Mutex::new(None)),
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> TalkingState {
        self.state
    }

    /// Run the call until the carrier hangs up, the call context is
    /// cancelled, or a fatal error occurs.
    pub async fn run(&mut self) -> Result<(), TalkingError> {
        let conversation_id = self.streamer.identity().conversation_id.clone();
        let result = loop {
            match self.streamer.recv().await {
                Ok(InboundEvent::Configuration(configuration)) => {
                    if let Err(e) = self.connect(configuration).await {
                        error!(conversation_id = %conversation_id, error = %e, "Failed to connect providers");
                        break Err(e);
                    }
                }
                Ok(InboundEvent::Message(packet)) => {
                    if self.state != TalkingState::Active {
                        debug!(kind = packet.kind(), "Dropping packet before configuration");
                        continue;
                    }
                    if let Err(e) = self.input(packet).await {
                        warn!(conversation_id = %conversation_id, error = %e, "Failed to handle inbound packet");
                    }
                }
                Err(StreamError::EndOfStream) | Err(StreamError::Closed) => {
                    break match self.fatal.lock().take() {
                        Some(err) => Err(TalkingError::Transformer(err)),
                        None => Ok(()),
                    };
                }
                Err(e) => break Err(TalkingError::Stream(e)),
            }
        };
        self.disconnect().await;
        info!(conversation_id = %conversation_id, ok = result.is_ok(), "Call finished");
        result
    }

    /// Replace the current providers with ones built for `configuration`.
    pub async fn connect(&mut self, configuration: CallConfiguration) -> Result<(), TalkingError> {
        self.state = TalkingState::Configuring;
        if let Some(mut previous) = self.connection.take() {
            previous.close().await;
        }

        let identity = configuration.identity;
        let profile = self.services.assistants.resolve(&identity);
        let stt_selection = configuration
            .stt
            .or_else(|| profile.as_ref().map(|p| p.stt.clone()))
            .ok_or_else(|| TalkingError::Configuration("no speech-to-text provider selected".into()))?;
        let tts_selection = configuration
            .tts
            .or_else(|| profile.as_ref().map(|p| p.tts.clone()))
            .ok_or_else(|| TalkingError::Configuration("no text-to-speech provider selected".into()))?;

        let carrier = self.streamer.config();
        let (stt_tx, stt_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (tts_tx, tts_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut stt = self.services.factory.create_stt(
            &identity,
            &stt_selection,
            carrier.input.decoded(),
            stt_tx,
        )?;
        if let Err(e) = stt.initialize().await {
            let _ = stt.close().await;
            return Err(e.into());
        }
        let mut tts = match self.services.factory.create_tts(
            &identity,
            &tts_selection,
            carrier.output.decoded(),
            tts_tx,
        ) {
            Ok(tts) => tts,
            Err(e) => {
                let _ = stt.close().await;
                return Err(e);
            }
        };
        if let Err(e) = tts.initialize().await {
            let _ = stt.close().await;
            return Err(e.into());
        }

        let stt_input = stt.input_config();
        let tts_output = tts.output_config();
        let stt: SharedStt = Arc::new(tokio::sync::Mutex::new(stt));
        let tts: SharedTts = Arc::new(tokio::sync::Mutex::new(tts));
        let speaker = Speaker::new(tts.clone(), self.streamer.clone());

        let pump_cancel = self.streamer.context().child_token();
        let pump = OutputPump {
            streamer: self.streamer.clone(),
            speaker: speaker.clone(),
            handler: self.services.handler.clone(),
            recorder: self.recorder.clone(),
            resampler: self.resampler,
            tts_output,
            carrier_output: carrier.output.decoded(),
            call: self.streamer.context(),
            fatal: self.fatal.clone(),
        };
        let pump = tokio::spawn(pump.run(stt_rx, tts_rx, pump_cancel.clone()));

        info!(
            conversation_id = %identity.conversation_id,
            stt = %stt_selection.provider,
            tts = %tts_selection.provider,
            "Providers connected"
        );
        self.connection = Some(Connection {
            stt,
            tts,
            stt_input,
            speaker: speaker.clone(),
            pump_cancel,
            pump,
            closed: AtomicBool::new(false),
        });
        self.state = TalkingState::Active;

        if let Err(e) = self.services.handler.on_connect(&identity, &speaker).await {
            warn!(error = %e, "Conversation handler rejected connect");
        }
        if let Some(greeting) = profile.and_then(|p| p.greeting).filter(|g| !g.is_empty())
            && let Err(e) = speaker.say(&greeting).await
        {
            warn!(error = %e, "Failed to speak greeting");
        }
        Ok(())
    }

    /// Route one inbound carrier packet.
    pub async fn input(&mut self, packet: Packet) -> Result<(), TalkingError> {
        let Some(connection) = &self.connection else {
            return Ok(());
        };
        match packet {
            Packet::Audio(chunk) => {
                let source = self.streamer.config().input.decoded();
                if let Some(recorder) = &self.recorder
                    && let Err(e) = recorder.record(Role::User, &chunk.data, &source)
                {
                    debug!(error = %e, "Skipping unrecordable caller audio");
                }
                let data = self
                    .resampler
                    .resample(&chunk.data, &source, &connection.stt_input)?;
                connection
                    .stt
                    .lock()
                    .await
                    .transform(Packet::audio(chunk.context_id, data))
                    .await?;
                Ok(())
            }
            Packet::Text(chunk) => {
                self.services
                    .handler
                    .on_user_text(chunk, &connection.speaker)
                    .await
            }
            Packet::Interruption { source } => connection.speaker.interrupt(source).await,
            Packet::Flush { .. } | Packet::Completion { .. } | Packet::Directive(_) => Ok(()),
        }
    }

    /// Tear the call down. Only the first call has any effect.
    pub async fn disconnect(&mut self) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        self.streamer.context().cancel();
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        if let Some(recorder) = self.recorder.take() {
            recorder.finalize_async().await;
        }
        self.state = TalkingState::Disconnected;
    }
}

// =============================================================================
// Output pump
// =============================================================================

struct OutputPump {
    streamer: Arc<dyn Streamer>,
    speaker: Speaker,
    handler: Arc<dyn ConversationHandler>,
    recorder: Option<Arc<CallRecorder>>,
    resampler: AudioResampler,
    tts_output: AudioConfig,
    carrier_output: AudioConfig,
    call: CancellationToken,
    fatal: Arc<Mutex<Option<TransformerError>>>,
}

enum Origin {
    Stt,
    Tts,
}

impl OutputPump {
    async fn run(
        self,
        mut stt_rx: mpsc::Receiver<TransformerEvent>,
        mut tts_rx: mpsc::Receiver<TransformerEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let (origin, event) = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(event) = stt_rx.recv() => (Origin::Stt, event),
                Some(event) = tts_rx.recv() => (Origin::Tts, event),
                else => break,
            };
            match (origin, event) {
                (_, TransformerEvent::Fatal(err)) => {
                    error!(error = %err, "Provider failed, ending call");
                    *self.fatal.lock() = Some(err);
                    self.call.cancel();
                    break;
                }
                (Origin::Stt, TransformerEvent::Packet(packet)) => self.on_transcriber(packet).await,
                (Origin::Tts, TransformerEvent::Packet(packet)) => self.on_synthesizer(packet).await,
            }
        }
        debug!("Output pump stopped");
    }

    async fn on_transcriber(&self, packet: Packet) {
        match packet {
            Packet::Interruption { source } => {
                if let Err(e) = self.speaker.interrupt(source).await {
                    warn!(error = %e, "Failed to interrupt output");
                }
            }
            Packet::Text(chunk) => {
                if let Err(e) = self.handler.on_transcript(chunk, &self.speaker).await {
                    warn!(error = %e, "Conversation handler failed");
                }
            }
            Packet::Audio(_) | Packet::Flush { .. } | Packet::Completion { .. } | Packet::Directive(_) => {}
        }
    }

    async fn on_synthesizer(&self, packet: Packet) {
        match packet {
            Packet::Audio(chunk) => {
                if !self.speaker.is_current(&chunk.context_id) {
                    debug!(context_id = %chunk.context_id, "Dropping stale synthesized audio");
                    return;
                }
                let data = match self
                    .resampler
                    .resample(&chunk.data, &self.tts_output, &self.carrier_output)
                {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(error = %e, "Dropping unconvertible synthesized audio");
                        return;
                    }
                };
                if let Some(recorder) = &self.recorder
                    && let Err(e) = recorder.record(Role::Assistant, &data, &self.carrier_output)
                {
                    debug!(error = %e, "Skipping unrecordable assistant audio");
                }
                if let Err(e) = self
                    .streamer
                    .send(Packet::audio(chunk.context_id, data))
                    .await
                {
                    warn!(error = %e, "Failed to deliver synthesized audio");
                }
            }
            Packet::Completion { context_id } => {
                if !self.speaker.is_current(&context_id) {
                    return;
                }
                if let Err(e) = self.streamer.send(Packet::completion(context_id)).await {
                    warn!(error = %e, "Failed to deliver completion");
                }
            }
            Packet::Text(_) | Packet::Flush { .. } | Packet::Interruption { .. } | Packet::Directive(_) => {}
        }
    }
}
