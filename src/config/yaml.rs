use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::talking::AssistantProfile;

/// YAML configuration structure
///
/// All fields are optional so a file only has to name what it overrides.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   public_host: "voice.example.com"
///
/// providers:
///   deepgram_api_key: "dg-key"
///
/// carriers:
///   twilio:
///     account_sid: "AC123"
///     auth_token: "token"
///
/// calls:
///   default_stt_provider: "deepgram"
///   default_tts_provider: "cartesia"
///   input_buffer_ms: 60
///
/// webrtc:
///   ice_servers: ["stun:stun.l.google.com:19302"]
///
/// assistants:
///   sales:
///     stt: { provider: deepgram }
///     tts: { provider: cartesia }
///     greeting: "Hi, how can I help?"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub providers: Option<ProvidersYaml>,
    pub carriers: Option<CarriersYaml>,
    pub calls: Option<CallsYaml>,
    pub recording: Option<RecordingYaml>,
    pub webrtc: Option<WebRtcYaml>,
    pub auth: Option<AuthYaml>,
    pub security: Option<SecurityYaml>,
    pub assistants: HashMap<String, AssistantProfile>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Host carriers use to reach this gateway, e.g. `voice.example.com`.
    pub public_host: Option<String>,
    pub tls: Option<TlsYaml>,
    /// Port of the Asterisk AudioSocket listener. Disabled when unset.
    pub audiosocket_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Speech provider API keys
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    pub deepgram_api_key: Option<String>,
    pub cartesia_api_key: Option<String>,
    pub assemblyai_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CarriersYaml {
    pub twilio: Option<TwilioYaml>,
    pub exotel: Option<ExotelYaml>,
    pub vonage: Option<VonageYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TwilioYaml {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ExotelYaml {
    pub account_sid: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub app_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VonageYaml {
    pub application_id: Option<String>,
    pub private_key_path: Option<String>,
}

/// Per-call defaults
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CallsYaml {
    pub default_stt_provider: Option<String>,
    pub default_tts_provider: Option<String>,
    pub input_buffer_ms: Option<u32>,
    pub output_frame_ms: Option<u32>,
    pub context_ttl_seconds: Option<u64>,
    /// Speak final transcripts back to the caller.
    pub echo_transcripts: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RecordingYaml {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WebRtcYaml {
    /// STUN/TURN URLs for browser peer connections.
    pub ice_servers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub required: Option<bool>,
    #[serde(default)]
    pub api_secrets: Vec<AuthApiSecretYaml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthApiSecretYaml {
    pub id: String,
    pub secret: String,
}

/// Security configuration from YAML
///
/// ```yaml
/// security:
///   cors_allowed_origins: "https://example.com,https://app.example.com"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_websocket_connections: 1000
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
