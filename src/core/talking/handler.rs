//! Conversation logic seam.
//!
//! A [`ConversationHandler`] sees every transcript and answers through a
//! [`Speaker`]. The speaker tags each reply with a fresh context id and
//! records it as the current output context, so audio still in flight from
//! an older reply is dropped before it reaches the caller.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{SharedTts, TalkingError};
use crate::core::packet::{Directive, InterruptionSource, Packet, TextChunk};
use crate::core::streamer::{CallIdentity, Streamer};

/// Handle for speaking into the call.
#[derive(Clone)]
pub struct Speaker {
    tts: SharedTts,
    streamer: Arc<dyn Streamer>,
    current: Arc<Mutex<Option<String>>>,
}

impl Speaker {
    pub(crate) fn new(tts: SharedTts, streamer: Arc<dyn Streamer>) -> Self {
        Self {
            tts,
            streamer,
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn current_context(&self) -> Option<String> {
        self.current.lock().clone()
    }

    pub fn is_current(&self, context_id: &str) -> bool {
        self.current.lock().as_deref() == Some(context_id)
    }

    /// Start a new utterance and make it current. Returns its context id.
    pub fn begin(&self) -> String {
        let context_id = uuid::Uuid::new_v4().to_string();
        *self.current.lock() = Some(context_id.clone());
        context_id
    }

    /// Stream a text fragment of utterance `context_id` to synthesis.
    pub async fn speak(&self, context_id: &str, text: &str) -> Result<(), TalkingError> {
        self.tts
            .lock()
            .await
            .transform(Packet::text(context_id, text, false))
            .await?;
        Ok(())
    }

    /// Mark utterance `context_id` complete.
    pub async fn flush(&self, context_id: &str) -> Result<(), TalkingError> {
        self.tts
            .lock()
            .await
            .transform(Packet::flush(context_id))
            .await?;
        Ok(())
    }

    /// Speak `text` as one complete utterance.
    pub async fn say(&self, text: &str) -> Result<String, TalkingError> {
        let context_id = self.begin();
        self.speak(&context_id, text).await?;
        self.flush(&context_id).await?;
        Ok(context_id)
    }

    /// Barge-in: tell the carrier to drop queued assistant audio, then clear
    /// synthesis.
    pub async fn interrupt(&self, source: InterruptionSource) -> Result<(), TalkingError> {
        let previous = self.current.lock().take();
        debug!(?source, context_id = ?previous, "Interrupting output");
        self.streamer.send(Packet::interruption(source)).await?;
        self.tts
            .lock()
            .await
            .transform(Packet::interruption(source))
            .await?;
        Ok(())
    }

    /// Deliver a packet to the caller as is.
    pub async fn notify(&self, packet: Packet) -> Result<(), TalkingError> {
        self.streamer.send(packet).await?;
        Ok(())
    }

    /// Ask the carrier to end the call.
    pub async fn end_conversation(&self) -> Result<(), TalkingError> {
        self.notify(Packet::Directive(Directive::EndConversation))
            .await
    }
}

#[async_trait]
pub trait ConversationHandler: Send + Sync {
    /// Called once the providers of a (re)configured call are connected.
    async fn on_connect(
        &self,
        _identity: &CallIdentity,
        _speaker: &Speaker,
    ) -> Result<(), TalkingError> {
        Ok(())
    }

    /// A transcript fragment from the speech-to-text provider.
    async fn on_transcript(&self, transcript: TextChunk, speaker: &Speaker)
    -> Result<(), TalkingError>;

    /// Text typed by the caller on clients that support it.
    async fn on_user_text(&self, text: TextChunk, speaker: &Speaker) -> Result<(), TalkingError> {
        self.on_transcript(text, speaker).await
    }
}

/// Forwards transcripts to the caller.
///
/// Native and WebRTC clients receive them as text events; telephony carriers
/// drop them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranscriptRelay;

#[async_trait]
impl ConversationHandler for TranscriptRelay {
    async fn on_transcript(
        &self,
        transcript: TextChunk,
        speaker: &Speaker,
    ) -> Result<(), TalkingError> {
        speaker.notify(Packet::Text(transcript)).await
    }
}

/// Relays transcripts and speaks each final one back.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoResponder;

#[async_trait]
impl ConversationHandler for EchoResponder {
    async fn on_transcript(
        &self,
        transcript: TextChunk,
        speaker: &Speaker,
    ) -> Result<(), TalkingError> {
        let reply = transcript.is_final.then(|| transcript.text.trim().to_string());
        speaker.notify(Packet::Text(transcript)).await?;
        match reply {
            Some(text) if !text.is_empty() => speaker.say(&text).await.map(|_| ()),
            _ => Ok(()),
        }
    }
}
