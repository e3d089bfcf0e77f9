//! Stream events exchanged between carriers, the orchestrator and providers.

use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// What triggered a barge-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionSource {
    /// The speech provider recognized words from the caller.
    Word,
    /// Voice activity was detected.
    Vad,
}

/// Call-level instructions sent towards the carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    EndConversation,
}

/// Raw samples in the negotiated format of whoever produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub context_id: String,
    pub data: Bytes,
}

/// A transcript fragment, or a fragment of text to synthesize.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub context_id: String,
    pub text: String,
    pub is_final: bool,
    pub confidence: Option<f32>,
    pub language: Option<String>,
}

/// One stream event. `context_id` groups the packets of a single utterance.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Audio(AudioChunk),
    Text(TextChunk),
    /// No more text for this utterance; synthesize what is buffered.
    Flush { context_id: String },
    /// Drop buffered output immediately and clear the provider.
    Interruption { source: InterruptionSource },
    /// The provider finished emitting audio for a context.
    Completion { context_id: String },
    Directive(Directive),
}

impl Packet {
    pub fn audio(context_id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Packet::Audio(AudioChunk {
            context_id: context_id.into(),
            data: data.into(),
        })
    }

    pub fn text(context_id: impl Into<String>, text: impl Into<String>, is_final: bool) -> Self {
        Packet::Text(TextChunk {
            context_id: context_id.into(),
            text: text.into(),
            is_final,
            confidence: None,
            language: None,
        })
    }

    pub fn flush(context_id: impl Into<String>) -> Self {
        Packet::Flush {
            context_id: context_id.into(),
        }
    }

    pub fn completion(context_id: impl Into<String>) -> Self {
        Packet::Completion {
            context_id: context_id.into(),
        }
    }

    pub fn interruption(source: InterruptionSource) -> Self {
        Packet::Interruption { source }
    }

    /// The utterance this packet belongs to, if it is utterance-scoped.
    pub fn context_id(&self) -> Option<&str> {
        match self {
            Packet::Audio(chunk) => Some(&chunk.context_id),
            Packet::Text(chunk) => Some(&chunk.context_id),
            Packet::Flush { context_id } | Packet::Completion { context_id } => Some(context_id),
            Packet::Interruption { .. } | Packet::Directive(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Audio(_) => "audio",
            Packet::Text(_) => "text",
            Packet::Flush { .. } => "flush",
            Packet::Interruption { .. } => "interruption",
            Packet::Completion { .. } => "completion",
            Packet::Directive(_) => "directive",
        }
    }
}

/// Speaker of a recorded segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Audio captured for the call recorder.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub role: Role,
    pub data: Bytes,
    pub timestamp: SystemTime,
}

impl AudioSegment {
    pub fn new(role: Role, data: Bytes) -> Self {
        Self {
            role,
            data,
            timestamp: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_id() {
        assert_eq!(Packet::audio("c1", vec![0u8; 4]).context_id(), Some("c1"));
        assert_eq!(Packet::flush("c2").context_id(), Some("c2"));
        assert_eq!(
            Packet::interruption(InterruptionSource::Word).context_id(),
            None
        );
        assert_eq!(Packet::Directive(Directive::EndConversation).context_id(), None);
    }

    #[test]
    fn test_kind() {
        assert_eq!(Packet::text("c", "hi", true).kind(), "text");
        assert_eq!(Packet::completion("c").kind(), "completion");
    }
}
