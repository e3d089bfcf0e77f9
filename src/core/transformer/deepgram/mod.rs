//! Deepgram streaming speech-to-text and text-to-speech.
//!
//! Both directions use `Authorization: token <key>` on the WebSocket upgrade.
//!
//! - STT: `wss://api.deepgram.com/v1/listen`, binary audio in, JSON `Results` out
//! - TTS: `wss://api.deepgram.com/v1/speak`, JSON `Speak`/`Flush`/`Clear` in,
//!   binary audio out

mod messages;
mod stt;
mod tts;

pub use stt::DeepgramStt;
pub use tts::DeepgramTts;

use url::Url;

use super::session::provider_url;
use super::{ProviderOptions, TransformerError, speak_output_format};
use crate::core::audio::{AudioConfig, AudioFormat};

pub const DEFAULT_STT_MODEL: &str = "nova-3";
pub const DEFAULT_TTS_MODEL: &str = "aura-2-thalia-en";
pub const DEFAULT_LANGUAGE: &str = "en";

const LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";
const SPEAK_URL: &str = "wss://api.deepgram.com/v1/speak";

/// Deepgram's name for a PCM encoding.
fn encoding_name(format: AudioFormat) -> Result<&'static str, TransformerError> {
    match format {
        AudioFormat::Linear16 => Ok("linear16"),
        AudioFormat::Mulaw8 => Ok("mulaw"),
        AudioFormat::Opus48 => Err(TransformerError::Configuration(
            "Deepgram streaming requires decoded PCM; got opus".to_string(),
        )),
    }
}

fn auth_header(api_key: &str) -> (&'static str, String) {
    ("Authorization", format!("token {api_key}"))
}

// =============================================================================
// STT Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct DeepgramSttConfig {
    pub api_key: String,
    pub model: String,
    pub language: String,
    /// Audio fed to the provider; Opus is decoded upstream.
    pub input: AudioConfig,
    pub base_url: Url,
    pub options: ProviderOptions,
}

impl DeepgramSttConfig {
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
            base_url: provider_url(LISTEN_URL, options)?,
            options: options.clone(),
        })
    }

    pub fn websocket_url(&self) -> Result<Url, TransformerError> {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("model", &self.model)
            .append_pair("language", &self.language)
            .append_pair("encoding", encoding_name(self.input.format)?)
            .append_pair("sample_rate", &self.input.sample_rate.to_string())
            .append_pair("channels", &self.input.channels.to_string())
            .append_pair("interim_results", "true")
            .append_pair("smart_format", "true");
        Ok(url)
    }
}

// =============================================================================
// TTS Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct DeepgramTtsConfig {
    pub api_key: String,
    pub model: String,
    pub output: AudioConfig,
    pub base_url: Url,
}

impl DeepgramTtsConfig {
    pub fn from_options(
        api_key: String,
        output: AudioConfig,
        options: &ProviderOptions,
    ) -> Result<Self, TransformerError> {
        let output = speak_output_format(output, options)?;
        encoding_name(output.format)?;
        // Deepgram voices are models; a voice id wins over the model option.
        let model = options
            .get("speak.voice.id")
            .or_else(|| options.get("speak.model"))
            .unwrap_or(DEFAULT_TTS_MODEL)
            .to_string();
        Ok(Self {
            api_key,
            model,
            output,
            base_url: provider_url(SPEAK_URL, options)?,
        })
    }

    pub fn websocket_url(&self) -> Result<Url, TransformerError> {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("model", &self.model)
            .append_pair("encoding", encoding_name(self.output.format)?)
            .append_pair("sample_rate", &self.output.sample_rate.to_string());
        Ok(url)
    }
}
