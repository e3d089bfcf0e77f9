//! Speech provider transformers.
//!
//! A [`Transformer`] owns one streaming connection to a vendor endpoint and
//! translates between [`Packet`]s and the vendor's wire protocol. Results are
//! delivered on the bounded [`TransformerEvent`] channel handed over at
//! construction, in the order the provider produced them.
//!
//! # Providers
//!
//! | Kind | Provider | Transport |
//! |------|----------|-----------|
//! | STT | Deepgram | WebSocket, binary audio in |
//! | STT | Cartesia | WebSocket, binary audio in |
//! | STT | AssemblyAI | WebSocket v3, binary audio in |
//! | TTS | Cartesia | WebSocket, base64 chunks out |
//! | TTS | Deepgram | WebSocket, binary audio out |

pub mod assemblyai;
pub mod cartesia;
pub mod deepgram;
mod options;
mod session;

pub use options::{
    CREDENTIAL_KEY, Credential, ENDPOINT_KEY, ProviderOptions, ProviderSelection,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::audio::AudioConfig;
use crate::core::packet::Packet;

/// Capacity of the event channel between a transformer and its consumer.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransformerError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Provider timeout: {0}")]
    Timeout(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),
    #[error("Transformer closed")]
    Closed,
}

impl TransformerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransformerError::Timeout(_))
    }
}

/// Output of a transformer's receive loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformerEvent {
    Packet(Packet),
    /// The provider session failed and will not recover.
    Fatal(TransformerError),
}

pub type EventSender = mpsc::Sender<TransformerEvent>;

/// A streaming provider connection.
#[async_trait]
pub trait Transformer: Send {
    /// Open the provider connection.
    async fn initialize(&mut self) -> Result<(), TransformerError>;

    /// Feed one packet. Reconnects first if the session went stale.
    async fn transform(&mut self, packet: Packet) -> Result<(), TransformerError>;

    /// Close the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<(), TransformerError>;

    fn name(&self) -> &'static str;
}

/// Accepts `Audio`, emits `Interruption` + `Text` per transcript.
pub trait SpeechToText: Transformer {
    /// Format the provider expects audio in.
    fn input_config(&self) -> AudioConfig;
}

/// Accepts `Text`/`Flush`/`Interruption`, emits `Audio` + `Completion`.
pub trait TextToSpeech: Transformer {
    /// Format of synthesized audio.
    fn output_config(&self) -> AudioConfig;
}

/// Supported speech-to-text providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SttProvider {
    Deepgram,
    Cartesia,
    AssemblyAI,
}

impl std::fmt::Display for SttProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SttProvider::Deepgram => write!(f, "deepgram"),
            SttProvider::Cartesia => write!(f, "cartesia"),
            SttProvider::AssemblyAI => write!(f, "assemblyai"),
        }
    }
}

impl std::str::FromStr for SttProvider {
    type Err = TransformerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deepgram" => Ok(SttProvider::Deepgram),
            "cartesia" => Ok(SttProvider::Cartesia),
            "assemblyai" | "assembly-ai" | "assembly_ai" => Ok(SttProvider::AssemblyAI),
            _ => Err(TransformerError::Configuration(format!(
                "illegal speech to text identifier '{s}'. Supported providers: deepgram, cartesia, assemblyai"
            ))),
        }
    }
}

/// Supported text-to-speech providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtsProvider {
    Cartesia,
    Deepgram,
}

impl std::fmt::Display for TtsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TtsProvider::Cartesia => write!(f, "cartesia"),
            TtsProvider::Deepgram => write!(f, "deepgram"),
        }
    }
}

impl std::str::FromStr for TtsProvider {
    type Err = TransformerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cartesia" => Ok(TtsProvider::Cartesia),
            "deepgram" => Ok(TtsProvider::Deepgram),
            _ => Err(TransformerError::Configuration(format!(
                "illegal text to speech identifier '{s}'. Supported providers: cartesia, deepgram"
            ))),
        }
    }
}

/// Build a speech-to-text transformer.
///
/// `input` is the audio format the caller will feed; providers that support
/// it stream it natively.
pub fn create_stt(
    provider: SttProvider,
    input: AudioConfig,
    credential: &Credential,
    options: &ProviderOptions,
    events: EventSender,
) -> Result<Box<dyn SpeechToText>, TransformerError> {
    let api_key = credential
        .require(CREDENTIAL_KEY)
        .map_err(TransformerError::Authentication)?
        .to_string();
    match provider {
        SttProvider::Deepgram => Ok(Box::new(deepgram::DeepgramStt::new(
            deepgram::DeepgramSttConfig::from_options(api_key, input, options)?,
            events,
        ))),
        SttProvider::Cartesia => Ok(Box::new(cartesia::CartesiaStt::new(
            cartesia::CartesiaSttConfig::from_options(api_key, input, options)?,
            events,
        ))),
        SttProvider::AssemblyAI => Ok(Box::new(assemblyai::AssemblyAiStt::new(
            assemblyai::AssemblyAiConfig::from_options(api_key, input, options)?,
            events,
        ))),
    }
}

/// Build a text-to-speech transformer.
///
/// `output` is the preferred synthesis format; `speak.output_format.*`
/// options override it.
pub fn create_tts(
    provider: TtsProvider,
    output: AudioConfig,
    credential: &Credential,
    options: &ProviderOptions,
    events: EventSender,
) -> Result<Box<dyn TextToSpeech>, TransformerError> {
    let api_key = credential
        .require(CREDENTIAL_KEY)
        .map_err(TransformerError::Authentication)?
        .to_string();
    match provider {
        TtsProvider::Cartesia => Ok(Box::new(cartesia::CartesiaTts::new(
            cartesia::CartesiaTtsConfig::from_options(api_key, output, options)?,
            events,
        ))),
        TtsProvider::Deepgram => Ok(Box::new(deepgram::DeepgramTts::new(
            deepgram::DeepgramTtsConfig::from_options(api_key, output, options)?,
            events,
        ))),
    }
}

/// Output format from `speak.output_format.*`, falling back to `preferred`.
pub(crate) fn speak_output_format(
    preferred: AudioConfig,
    options: &ProviderOptions,
) -> Result<AudioConfig, TransformerError> {
    let mut config = preferred.decoded();
    if let Some(encoding) = options.get("speak.output_format.encoding") {
        config.format = encoding
            .parse()
            .map_err(|e: crate::core::audio::AudioError| TransformerError::Configuration(e.to_string()))?;
    }
    if let Some(rate) = options.get_u32("speak.output_format.sample_rate") {
        config.sample_rate = rate;
    }
    config
        .validate()
        .map_err(|e| TransformerError::Configuration(e.to_string()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::AudioFormat;

    #[test]
    fn test_provider_parse() {
        assert_eq!("Deepgram".parse::<SttProvider>().unwrap(), SttProvider::Deepgram);
        assert_eq!("assemblyai".parse::<SttProvider>().unwrap(), SttProvider::AssemblyAI);
        assert_eq!("cartesia".parse::<TtsProvider>().unwrap(), TtsProvider::Cartesia);
        let err = "whisper".parse::<SttProvider>().unwrap_err();
        assert!(err.to_string().contains("illegal speech to text identifier"));
        let err = "polly".parse::<TtsProvider>().unwrap_err();
        assert!(err.to_string().contains("illegal text to speech identifier"));
    }

    #[test]
    fn test_provider_display_round_trip() {
        for p in [SttProvider::Deepgram, SttProvider::Cartesia, SttProvider::AssemblyAI] {
            assert_eq!(p.to_string().parse::<SttProvider>().unwrap(), p);
        }
    }

    #[test]
    fn test_missing_key_is_authentication_error() {
        let (tx, _rx) = mpsc::channel(8);
        let result = create_stt(
            SttProvider::Deepgram,
            AudioConfig::linear16_16k(),
            &Credential::new(),
            &ProviderOptions::new(),
            tx,
        );
        assert!(matches!(result, Err(TransformerError::Authentication(_))));
    }

    #[test]
    fn test_speak_output_format_override() {
        let opts = ProviderOptions::new()
            .with("speak.output_format.encoding", "pcm_mulaw")
            .with("speak.output_format.sample_rate", "8000");
        let cfg = speak_output_format(AudioConfig::linear16_16k(), &opts).unwrap();
        assert_eq!(cfg.format, AudioFormat::Mulaw8);
        assert_eq!(cfg.sample_rate, 8000);
    }
}
