//! Deepgram WebSocket message types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Listen (STT)
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsMessage {
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub speech_final: bool,
}

impl ResultsMessage {
    /// First alternative with a non-empty transcript.
    pub fn best_alternative(&self) -> Option<&Alternative> {
        self.channel
            .alternatives
            .iter()
            .find(|alt| !alt.transcript.is_empty())
    }
}

#[derive(Debug, Clone)]
pub enum ListenMessage {
    Results(ResultsMessage),
    Metadata,
    UtteranceEnd,
    SpeechStarted,
    Unknown(String),
}

#[derive(Deserialize)]
struct TypePeek {
    #[serde(rename = "type")]
    message_type: String,
}

impl ListenMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let peek: TypePeek = serde_json::from_str(text)?;
        match peek.message_type.as_str() {
            "Results" => Ok(ListenMessage::Results(serde_json::from_str(text)?)),
            "Metadata" => Ok(ListenMessage::Metadata),
            "UtteranceEnd" => Ok(ListenMessage::UtteranceEnd),
            "SpeechStarted" => Ok(ListenMessage::SpeechStarted),
            _ => Ok(ListenMessage::Unknown(text.to_string())),
        }
    }
}

/// Most frequent language tag; `"en"` when none are reported.
pub fn most_used_language(languages: &[String]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for language in languages {
        *counts.entry(language.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(language, _)| language.to_string())
        .unwrap_or_else(|| "en".to_string())
}

/// Control message for the listen socket.
#[derive(Debug, Clone, Serialize)]
pub struct ListenControl {
    #[serde(rename = "type")]
    pub message_type: &'static str,
}

impl ListenControl {
    pub const KEEP_ALIVE: ListenControl = ListenControl {
        message_type: "KeepAlive",
    };
    pub const CLOSE_STREAM: ListenControl = ListenControl {
        message_type: "CloseStream",
    };
}

// =============================================================================
// Speak (TTS)
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SpeakRequest {
    Speak { text: String },
    Flush,
    Clear,
    Close,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum SpeakResponse {
    Metadata {
        #[serde(default)]
        request_id: Option<String>,
    },
    Flushed {
        #[serde(default)]
        sequence_id: Option<u64>,
    },
    Cleared {
        #[serde(default)]
        sequence_id: Option<u64>,
    },
    Warning {
        #[serde(default)]
        description: String,
        #[serde(default)]
        code: Option<String>,
    },
    Error {
        #[serde(default)]
        description: String,
        #[serde(default)]
        code: Option<String>,
    },
}
