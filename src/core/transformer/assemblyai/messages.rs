//! AssemblyAI v3 WebSocket messages.
//!
//! Inbound: `Begin`, `Turn`, `Termination`, `Error`.
//! Outbound: binary audio plus the JSON `Terminate` control.

use serde::{Deserialize, Serialize};

// =============================================================================
// Server to Client
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BeginMessage {
    pub id: String,
    #[serde(default)]
    pub expires_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Word {
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub end: u64,
    pub confidence: f64,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TurnMessage {
    #[serde(default)]
    pub turn_order: u32,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub end_of_turn: bool,
    #[serde(default)]
    pub words: Vec<Word>,
    #[serde(default)]
    pub language: Option<String>,
}

impl TurnMessage {
    /// Mean word confidence; `None` without words.
    pub fn confidence(&self) -> Option<f32> {
        if self.words.is_empty() {
            return None;
        }
        let sum: f64 = self.words.iter().map(|w| w.confidence).sum();
        Some(((sum / self.words.len() as f64) as f32).clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminationMessage {
    #[serde(default)]
    pub audio_duration_ms: u64,
    #[serde(default)]
    pub terminated_normally: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    #[serde(default)]
    pub error_code: Option<String>,
    pub error: String,
}

#[derive(Debug)]
pub enum ServerMessage {
    Begin(BeginMessage),
    Turn(TurnMessage),
    Termination(TerminationMessage),
    Error(ErrorMessage),
    Unknown(String),
}

impl ServerMessage {
    /// Peek the `type` field, then decode the matching payload.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct TypePeek {
            #[serde(rename = "type")]
            message_type: String,
        }

        let peek: TypePeek = serde_json::from_str(text)?;
        match peek.message_type.as_str() {
            "Begin" => Ok(ServerMessage::Begin(serde_json::from_str(text)?)),
            "Turn" => Ok(ServerMessage::Turn(serde_json::from_str(text)?)),
            "Termination" => Ok(ServerMessage::Termination(serde_json::from_str(text)?)),
            "Error" => Ok(ServerMessage::Error(serde_json::from_str(text)?)),
            _ => Ok(ServerMessage::Unknown(text.to_string())),
        }
    }
}

// =============================================================================
// Client to Server
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub message_type: &'static str,
}

impl ControlMessage {
    pub const TERMINATE: ControlMessage = ControlMessage {
        message_type: "Terminate",
    };
}
