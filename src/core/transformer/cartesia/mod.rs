//! Cartesia streaming speech-to-text and text-to-speech.
//!
//! Cartesia authenticates with `api_key` and `cartesia_version` query
//! parameters on both sockets.

mod messages;
mod stt;
mod tts;

pub use stt::CartesiaStt;
pub use tts::CartesiaTts;

use url::Url;

use super::session::provider_url;
use super::{ProviderOptions, TransformerError, speak_output_format};
use crate::core::audio::{AudioConfig, AudioFormat};

pub const CARTESIA_API_VERSION: &str = "2024-06-10";
pub const DEFAULT_TTS_MODEL: &str = "sonic-2-2025-03-07";
pub const DEFAULT_VOICE_ID: &str = "c2ac25f9-ecc4-4f56-9095-651354df60c0";
pub const DEFAULT_STT_MODEL: &str = "ink-whisper";
pub const DEFAULT_LANGUAGE: &str = "en";

const STT_URL: &str = "wss://api.cartesia.ai/stt/websocket";
const TTS_URL: &str = "wss://api.cartesia.ai/tts/websocket";

fn encoding_name(format: AudioFormat) -> Result<&'static str, TransformerError> {
    match format {
        AudioFormat::Linear16 => Ok("pcm_s16le"),
        AudioFormat::Mulaw8 => Ok("pcm_mulaw"),
        AudioFormat::Opus48 => Err(TransformerError::Configuration(
            "Cartesia streaming requires decoded PCM; got opus".to_string(),
        )),
    }
}

fn authenticated(mut url: Url, api_key: &str) -> Url {
    url.query_pairs_mut()
        .append_pair("api_key", api_key)
        .append_pair("cartesia_version", CARTESIA_API_VERSION);
    url
}

// =============================================================================
// STT Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct CartesiaSttConfig {
    pub api_key: String,
    pub model: String,
    pub language: String,
    pub input: AudioConfig,
    pub base_url: Url,
    pub options: ProviderOptions,
}

impl CartesiaSttConfig {
    pub fn from_options(
        api_key: String,
        input: AudioConfig,
        options: &ProviderOptions,
    ) -> Result<Self, TransformerError> {
        let input = input.decoded();
        encoding_name(input.format)?;
        Ok(Self {
            api_key,
            model: options.get_or("listen.model", DEFAULT_STT_MODEL).to_string(),
            language: options.get_or("listen.language", DEFAULT_LANGUAGE).to_string(),
            input,
            base_url: provider_url(STT_URL, options)?,
            options: options.clone(),
        })
    }

    pub fn websocket_url(&self) -> Result<Url, TransformerError> {
        let mut url = authenticated(self.base_url.clone(), &self.api_key);
        url.query_pairs_mut()
            .append_pair("model", &self.model)
            .append_pair("language", &self.language)
            .append_pair("encoding", encoding_name(self.input.format)?)
            .append_pair("sample_rate", &self.input.sample_rate.to_string());
        Ok(url)
    }
}

// =============================================================================
// TTS Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct CartesiaTtsConfig {
    pub api_key: String,
    pub model: String,
    pub voice_id: String,
    pub language: Option<String>,
    pub output: AudioConfig,
    pub speed: Option<String>,
    pub emotion: Vec<String>,
    pub base_url: Url,
}

impl CartesiaTtsConfig {
    pub fn from_options(
        api_key: String,
        output: AudioConfig,
        options: &ProviderOptions,
    ) -> Result<Self, TransformerError> {
        let output = speak_output_format(output, options)?;
        encoding_name(output.format)?;
        Ok(Self {
            api_key,
            model: options.get_or("speak.model", DEFAULT_TTS_MODEL).to_string(),
            voice_id: options.get_or("speak.voice.id", DEFAULT_VOICE_ID).to_string(),
            language: options.get("speak.language").map(str::to_string),
            output,
            speed: options
                .get("speak.__experimental_controls.speed")
                .map(str::to_string),
            emotion: options
                .get("speak.__experimental_controls.emotion")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|e| !e.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            base_url: provider_url(TTS_URL, options)?,
        })
    }

    pub fn websocket_url(&self) -> Url {
        authenticated(self.base_url.clone(), &self.api_key)
    }
}
