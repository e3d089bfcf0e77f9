//! JSON client protocol spoken by the native and WebRTC carriers.

use serde::{Deserialize, Serialize};

use crate::core::transformer::ProviderSelection;

/// Messages sent by a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts the conversation. Provider choices are optional.
    Config {
        #[serde(default)]
        stt: Option<ProviderSelection>,
        #[serde(default)]
        tts: Option<ProviderSelection>,
    },
    /// Base64 audio in the stream's input format.
    Audio { data: String },
    /// Typed user input.
    Text { text: String },
    Interrupt,
    End,
    Offer { sdp: String },
    Answer { sdp: String },
    Ice {
        candidate: String,
        #[serde(default, rename = "sdpMid")]
        sdp_mid: Option<String>,
        #[serde(default, rename = "sdpMLineIndex")]
        sdp_mline_index: Option<u16>,
    },
    Disconnect,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Events sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Ready {
        conversation_id: String,
    },
    Text {
        context_id: String,
        text: String,
        is_final: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
    },
    Completion {
        context_id: String,
    },
    Interruption,
    End,
    Answer {
        sdp: String,
    },
    Offer {
        sdp: String,
    },
    Ice {
        candidate: String,
        #[serde(skip_serializing_if = "Option::is_none", rename = "sdpMid")]
        sdp_mid: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", rename = "sdpMLineIndex")]
        sdp_mline_index: Option<u16>,
    },
    Error {
        message: String,
    },
}
