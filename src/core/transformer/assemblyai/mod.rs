//! AssemblyAI Streaming STT (API v3).
//!
//! Transcripts arrive as immutable turns: once a turn with `end_of_turn`
//! is delivered it is never revised. Audio is sent as raw binary frames.
//!
//! - [`messages`]: server and client message types
//! - [`client`]: the [`AssemblyAiStt`] transformer

mod client;
mod messages;

pub use client::AssemblyAiStt;

use std::str::FromStr;

use url::Url;

use super::session::provider_url;
use super::{ProviderOptions, TransformerError};
use crate::core::audio::{AudioConfig, AudioFormat};

/// Minimum supported sample rate (telephony).
pub const MIN_SAMPLE_RATE: u32 = 8000;

/// Maximum supported sample rate.
pub const MAX_SAMPLE_RATE: u32 = 48000;

// =============================================================================
// Speech Model
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeechModel {
    #[default]
    UniversalStreamingEnglish,
    UniversalStreamingMultilingual,
}

impl SpeechModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UniversalStreamingEnglish => "universal-streaming-english",
            Self::UniversalStreamingMultilingual => "universal-streaming-multilingual",
        }
    }
}

impl FromStr for SpeechModel {
    type Err = ();

    /// Unknown values fall back to the English model.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "universal-streaming-multilingual" | "multilingual" => {
                Self::UniversalStreamingMultilingual
            }
            _ => Self::UniversalStreamingEnglish,
        })
    }
}

// =============================================================================
// Region
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Region {
    #[default]
    Default,
    Eu,
}

impl Region {
    pub fn websocket_url(&self) -> &'static str {
        match self {
            Self::Default => "wss://streaming.assemblyai.com/v3/ws",
            Self::Eu => "wss://streaming.eu.assemblyai.com/v3/ws",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct AssemblyAiConfig {
    pub api_key: String,
    pub speech_model: SpeechModel,
    pub input: AudioConfig,
    pub format_turns: bool,
    pub end_of_turn_confidence_threshold: Option<f32>,
    pub base_url: Url,
    pub options: ProviderOptions,
}

impl AssemblyAiConfig {
    /// Options read: `listen.model`, `listen.language`, `listen.region`,
    /// `listen.end_of_turn_confidence_threshold`, `endpoint`.
    pub fn from_options(
        api_key: String,
        input: AudioConfig,
        options: &ProviderOptions,
    ) -> Result<Self, TransformerError> {
        let input = input.decoded();
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&input.sample_rate) {
            return Err(TransformerError::Configuration(format!(
                "Sample rate {} Hz is outside supported range ({}-{} Hz)",
                input.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }

        // An explicit model wins; otherwise non-English languages pick the multilingual model.
        let speech_model = match options.get("listen.model") {
            Some(model) => model.parse().unwrap_or_default(),
            None => match options.get("listen.language") {
                Some(lang) if !lang.starts_with("en") => SpeechModel::UniversalStreamingMultilingual,
                _ => SpeechModel::UniversalStreamingEnglish,
            },
        };

        let region = match options.get("listen.region") {
            Some(r) if r.eq_ignore_ascii_case("eu") => Region::Eu,
            _ => Region::Default,
        };

        Ok(Self {
            api_key,
            speech_model,
            input,
            format_turns: true,
            end_of_turn_confidence_threshold: options
                .get("listen.end_of_turn_confidence_threshold")
                .and_then(|v| v.parse().ok()),
            base_url: provider_url(region.websocket_url(), options)?,
            options: options.clone(),
        })
    }

    pub fn encoding(&self) -> &'static str {
        match self.input.format {
            AudioFormat::Mulaw8 => "pcm_mulaw",
            AudioFormat::Linear16 | AudioFormat::Opus48 => "pcm_s16le",
        }
    }

    pub fn websocket_url(&self) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("sample_rate", &self.input.sample_rate.to_string())
                .append_pair("encoding", self.encoding())
                .append_pair("speech_model", self.speech_model.as_str())
                .append_pair("format_turns", if self.format_turns { "true" } else { "false" });
            if let Some(threshold) = self.end_of_turn_confidence_threshold {
                query.append_pair(
                    "end_of_turn_confidence_threshold",
                    &format!("{:.2}", threshold.clamp(0.0, 1.0)),
                );
            }
        }
        url
    }
}
