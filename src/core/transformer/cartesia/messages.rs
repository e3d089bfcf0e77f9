//! Cartesia WebSocket message types.

use serde::{Deserialize, Serialize};

// =============================================================================
// TTS Requests
// =============================================================================

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Voice {
    pub mode: &'static str,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutputFormat {
    pub container: &'static str,
    pub encoding: &'static str,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ExperimentalControls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub emotion: Vec<String>,
}

impl ExperimentalControls {
    pub fn is_empty(&self) -> bool {
        self.speed.is_none() && self.emotion.is_empty()
    }
}

/// One generation request within a context.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GenerationRequest {
    pub model_id: String,
    pub context_id: String,
    pub transcript: String,
    pub voice: Voice,
    pub output_format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(
        rename = "__experimental_controls",
        skip_serializing_if = "ExperimentalControls::is_empty"
    )]
    pub experimental_controls: ExperimentalControls,
    #[serde(rename = "continue")]
    pub continue_: bool,
    pub add_timestamps: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CancelRequest {
    pub context_id: String,
    pub cancel: bool,
}

impl CancelRequest {
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            cancel: true,
        }
    }
}

// =============================================================================
// TTS Responses
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TtsResponse {
    Chunk {
        data: String,
        #[serde(default)]
        context_id: String,
        #[serde(default)]
        status_code: Option<u16>,
    },
    Done {
        #[serde(default)]
        context_id: String,
    },
    Timestamps {
        #[serde(default)]
        context_id: String,
    },
    FlushDone {
        #[serde(default)]
        context_id: String,
    },
    Error {
        #[serde(default)]
        context_id: Option<String>,
        #[serde(default)]
        error: String,
        #[serde(default)]
        status_code: Option<u16>,
    },
}

// =============================================================================
// STT Responses
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptWord {
    pub word: String,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SttResponse {
    Transcript {
        #[serde(default)]
        text: String,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        words: Vec<TranscriptWord>,
        #[serde(default)]
        request_id: Option<String>,
    },
    FlushDone,
    Done,
    Error {
        #[serde(default)]
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_request_shape() {
        let request = GenerationRequest {
            model_id: "sonic-2-2025-03-07".into(),
            context_id: "ctx".into(),
            transcript: "Hello".into(),
            voice: Voice {
                mode: "id",
                id: "v".into(),
            },
            output_format: OutputFormat {
                container: "raw",
                encoding: "pcm_s16le",
                sample_rate: 16000,
            },
            language: Some("en".into()),
            experimental_controls: ExperimentalControls::default(),
            continue_: true,
            add_timestamps: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["continue"], true);
        assert_eq!(value["voice"]["mode"], "id");
        assert_eq!(value["output_format"]["container"], "raw");
        assert!(value.get("__experimental_controls").is_none());
    }

    #[test]
    fn test_cancel_shape() {
        let json = serde_json::to_string(&CancelRequest::new("old")).unwrap();
        assert_eq!(json, r#"{"context_id":"old","cancel":true}"#);
    }

    #[test]
    fn test_tts_response_parse() {
        let chunk: TtsResponse =
            serde_json::from_str(r#"{"type":"chunk","data":"AAAA","context_id":"c1","done":false,"status_code":206}"#)
                .unwrap();
        assert!(matches!(chunk, TtsResponse::Chunk { ref context_id, .. } if context_id == "c1"));
        let err: TtsResponse =
            serde_json::from_str(r#"{"type":"error","error":"bad","status_code":400}"#).unwrap();
        assert!(matches!(err, TtsResponse::Error { status_code: Some(400), .. }));
    }

    #[test]
    fn test_stt_response_parse() {
        let t: SttResponse = serde_json::from_str(
            r#"{"type":"transcript","text":"hi","is_final":true,"language":"en","words":[{"word":"hi","start":0.1,"end":0.3}]}"#,
        )
        .unwrap();
        assert!(matches!(t, SttResponse::Transcript { is_final: true, .. }));
        let done: SttResponse = serde_json::from_str(r#"{"type":"flush_done"}"#).unwrap();
        assert!(matches!(done, SttResponse::FlushDone));
    }
}
