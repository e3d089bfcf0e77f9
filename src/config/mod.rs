//! Configuration module for the gateway
//!
//! Configuration is read from .env files, YAML files and environment
//! variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use callbridge_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_env()?;
//!
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

use crate::core::carrier::CarrierKind;
use crate::core::streamer::BufferOptions;
use crate::core::talking::{AssistantProfile, StaticAssistants};
use crate::core::telephony::{CallbackUrls, StaticCredentials};
use crate::core::transformer::{Credential, ProviderSelection};

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// API secret authentication entry with a client identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthApiSecret {
    pub id: String,
    pub secret: String,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Host name carriers use for media and status callbacks.
    /// Falls back to `host:port` when unset.
    pub public_host: Option<String>,
    pub tls: Option<TlsConfig>,
    /// Asterisk AudioSocket TCP listener port.
    pub audiosocket_port: Option<u16>,

    // Speech providers
    pub deepgram_api_key: Option<String>,
    pub cartesia_api_key: Option<String>,
    pub assemblyai_api_key: Option<String>,

    // Carriers
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub exotel_account_sid: Option<String>,
    pub exotel_client_id: Option<String>,
    pub exotel_client_secret: Option<String>,
    pub exotel_app_id: Option<String>,
    pub vonage_application_id: Option<String>,
    pub vonage_private_key_path: Option<PathBuf>,

    // Call defaults
    pub default_stt_provider: Option<String>,
    pub default_tts_provider: Option<String>,
    pub input_buffer_ms: u32,
    pub output_frame_ms: u32,
    pub call_context_ttl_seconds: u64,
    /// Answer each final transcript by speaking it back instead of only
    /// relaying it to the client.
    pub echo_transcripts: bool,
    /// Directory for per-call WAV recordings. Recording is off when unset.
    pub recording_path: Option<PathBuf>,

    // WebRTC
    /// ICE servers offered to browser peer connections. Empty means host
    /// candidates only.
    pub webrtc_ice_servers: Vec<String>,

    // Authentication
    pub auth_api_secrets: Vec<AuthApiSecret>,
    pub auth_required: bool,

    // Security
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: u32,

    /// Provider profiles keyed by assistant id.
    pub assistants: HashMap<String, AssistantProfile>,
}

impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        for secret in [
            &mut self.deepgram_api_key,
            &mut self.cartesia_api_key,
            &mut self.assemblyai_api_key,
            &mut self.twilio_auth_token,
            &mut self.exotel_client_secret,
        ]
        .into_iter()
        .flatten()
        {
            secret.zeroize();
        }
        for entry in &mut self.auth_api_secrets {
            entry.secret.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file, with environment variables
    /// filling whatever the file leaves out.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an environment
    /// variable is malformed, or validation fails.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded in main.rs, so ENV already includes it here
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_auth_api_secrets(&self.auth_api_secrets)?;
        validation::validate_auth_required(self.auth_required, &self.auth_api_secrets)?;
        validation::validate_frame_durations(self.input_buffer_ms, self.output_frame_ms)?;
        validation::validate_tls(&self.tls)?;
        validation::validate_vonage(&self.vonage_application_id, &self.vonage_private_key_path)?;
        Ok(())
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn has_api_secret_auth(&self) -> bool {
        !self.auth_api_secrets.is_empty()
    }

    /// Find the API secret identifier that matches a bearer token
    pub fn find_api_secret_id(&self, token: &str) -> Option<&str> {
        crate::middleware::match_api_secret_id(token, &self.auth_api_secrets)
    }

    /// Get the API key of a speech provider
    pub fn get_api_key(&self, provider: &str) -> Result<String, String> {
        let (name, key) = match provider.to_lowercase().as_str() {
            "deepgram" => ("Deepgram", &self.deepgram_api_key),
            "cartesia" => ("Cartesia", &self.cartesia_api_key),
            "assemblyai" => ("AssemblyAI", &self.assemblyai_api_key),
            _ => return Err(format!("Unsupported provider: {provider}")),
        };
        key.clone()
            .ok_or_else(|| format!("{name} API key not configured in server environment"))
    }

    /// Buffer sizing handed to every carrier stream.
    pub fn buffer_options(&self) -> BufferOptions {
        BufferOptions {
            input_duration_ms: self.input_buffer_ms,
            output_frame_ms: self.output_frame_ms,
            ..BufferOptions::default()
        }
    }

    pub fn call_context_ttl(&self) -> Duration {
        Duration::from_secs(self.call_context_ttl_seconds)
    }

    pub fn callback_urls(&self) -> CallbackUrls {
        CallbackUrls::new(self.public_host.clone().unwrap_or_else(|| self.address()))
    }

    /// Build the credential set for providers and carriers.
    ///
    /// Only configured entries are included. Reads the Vonage private key
    /// from disk.
    pub fn credentials(&self) -> Result<StaticCredentials, Box<dyn std::error::Error>> {
        let mut credentials = StaticCredentials::new();

        for provider in ["deepgram", "cartesia", "assemblyai"] {
            if let Ok(key) = self.get_api_key(provider) {
                credentials = credentials.with_provider(provider, Credential::api_key(key));
            }
        }

        if let (Some(sid), Some(token)) = (&self.twilio_account_sid, &self.twilio_auth_token) {
            credentials = credentials.with_carrier(
                CarrierKind::Twilio,
                Credential::new()
                    .with("account_sid", sid.as_str())
                    .with("account_token", token.as_str()),
            );
        }

        if let (Some(sid), Some(client_id), Some(client_secret), Some(app_id)) = (
            &self.exotel_account_sid,
            &self.exotel_client_id,
            &self.exotel_client_secret,
            &self.exotel_app_id,
        ) {
            credentials = credentials.with_carrier(
                CarrierKind::Exotel,
                Credential::new()
                    .with("account_sid", sid.as_str())
                    .with("client_id", client_id.as_str())
                    .with("client_secret", client_secret.as_str())
                    .with("app_id", app_id.as_str()),
            );
        }

        if let (Some(application_id), Some(key_path)) =
            (&self.vonage_application_id, &self.vonage_private_key_path)
        {
            let private_key = std::fs::read_to_string(key_path).map_err(|e| {
                format!(
                    "Failed to read Vonage private key {}: {e}",
                    key_path.display()
                )
            })?;
            credentials = credentials.with_carrier(
                CarrierKind::Vonage,
                Credential::new()
                    .with("application_id", application_id.as_str())
                    .with("private_key", private_key),
            );
        }

        Ok(credentials)
    }

    /// Assistant profiles, with the default providers as the fallback
    /// profile when both are configured.
    pub fn assistant_profiles(&self) -> StaticAssistants {
        let mut assistants = StaticAssistants::new();
        if let (Some(stt), Some(tts)) = (&self.default_stt_provider, &self.default_tts_provider) {
            assistants = assistants.with_fallback(AssistantProfile::new(
                ProviderSelection::new(stt.as_str()),
                ProviderSelection::new(tts.as_str()),
            ));
        }
        for (assistant_id, profile) in &self.assistants {
            assistants = assistants.with_profile(assistant_id.as_str(), profile.clone());
        }
        assistants
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::streamer::CallIdentity;
    use crate::core::talking::AssistantResolver;
    use crate::core::telephony::CredentialResolver;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    /// Configuration with every optional entry unset.
    pub(crate) fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3001,
            public_host: None,
            tls: None,
            audiosocket_port: None,
            deepgram_api_key: None,
            cartesia_api_key: None,
            assemblyai_api_key: None,
            twilio_account_sid: None,
            twilio_auth_token: None,
            exotel_account_sid: None,
            exotel_client_id: None,
            exotel_client_secret: None,
            exotel_app_id: None,
            vonage_application_id: None,
            vonage_private_key_path: None,
            default_stt_provider: None,
            default_tts_provider: None,
            input_buffer_ms: 60,
            output_frame_ms: 20,
            call_context_ttl_seconds: 300,
            echo_transcripts: false,
            recording_path: None,
            webrtc_ice_servers: Vec::new(),
            auth_api_secrets: Vec::new(),
            auth_required: false,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
            assistants: HashMap::new(),
        }
    }

    fn cleanup_env_vars() {
        unsafe {
            for var in [
                "HOST",
                "PORT",
                "DEEPGRAM_API_KEY",
                "TWILIO_ACCOUNT_SID",
                "TWILIO_AUTH_TOKEN",
                "DEFAULT_STT_PROVIDER",
                "DEFAULT_TTS_PROVIDER",
                "AUTH_REQUIRED",
                "AUTH_API_SECRET",
            ] {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_get_api_key() {
        let mut config = test_config();
        config.deepgram_api_key = Some("dg".to_string());

        assert_eq!(config.get_api_key("Deepgram"), Ok("dg".to_string()));
        assert_eq!(
            config.get_api_key("cartesia"),
            Err("Cartesia API key not configured in server environment".to_string())
        );
        assert!(config.get_api_key("whisper").unwrap_err().contains("Unsupported"));
    }

    #[test]
    fn test_callback_urls_fall_back_to_address() {
        let mut config = test_config();
        assert_eq!(
            config.callback_urls().media_url(CarrierKind::Twilio, "c1"),
            "wss://127.0.0.1:3001/v1/talk/twilio/ctx/c1"
        );
        config.public_host = Some("https://voice.example.com/".to_string());
        assert_eq!(
            config.callback_urls().event_url(CarrierKind::Vonage, "c1"),
            "https://voice.example.com/v1/talk/vonage/event/c1"
        );
    }

    #[test]
    fn test_buffer_options() {
        let mut config = test_config();
        config.input_buffer_ms = 100;
        let options = config.buffer_options();
        assert_eq!(options.input_duration_ms, 100);
        assert_eq!(options.output_frame_ms, 20);
        assert!(options.input_threshold.is_none());
    }

    #[test]
    fn test_credentials_only_include_configured_entries() {
        let mut config = test_config();
        config.cartesia_api_key = Some("ct".to_string());
        config.twilio_account_sid = Some("AC1".to_string());
        config.twilio_auth_token = Some("tok".to_string());
        // Exotel is incomplete and must be skipped
        config.exotel_account_sid = Some("ex".to_string());

        let credentials = config.credentials().unwrap();
        let identity = CallIdentity::new("a", "c");

        let cartesia = credentials.provider(&identity, "cartesia").unwrap();
        assert_eq!(cartesia.get("key"), Some("ct"));
        assert!(credentials.provider(&identity, "deepgram").is_err());

        let twilio = credentials.carrier(&identity, CarrierKind::Twilio).unwrap();
        assert_eq!(twilio.get("account_token"), Some("tok"));
        assert!(credentials.carrier(&identity, CarrierKind::Exotel).is_err());
    }

    #[test]
    fn test_credentials_read_vonage_key() {
        let temp_dir = TempDir::new().unwrap();
        let key_path = temp_dir.path().join("vonage.pem");
        fs::write(&key_path, "PEM").unwrap();

        let mut config = test_config();
        config.vonage_application_id = Some("app".to_string());
        config.vonage_private_key_path = Some(key_path);

        let credentials = config.credentials().unwrap();
        let vonage = credentials
            .carrier(&CallIdentity::new("a", "c"), CarrierKind::Vonage)
            .unwrap();
        assert_eq!(vonage.get("private_key"), Some("PEM"));

        config.vonage_private_key_path = Some(PathBuf::from("/nonexistent/vonage.pem"));
        assert!(config.credentials().is_err());
    }

    #[test]
    fn test_assistant_profiles() {
        let mut config = test_config();
        assert!(config.assistant_profiles().is_empty());

        config.default_stt_provider = Some("deepgram".to_string());
        config.default_tts_provider = Some("cartesia".to_string());
        config.assistants.insert(
            "support".to_string(),
            AssistantProfile::new(
                ProviderSelection::new("assemblyai"),
                ProviderSelection::new("deepgram"),
            ),
        );

        let assistants = config.assistant_profiles();
        let support = assistants
            .resolve(&CallIdentity::new("support", "c"))
            .unwrap();
        assert_eq!(support.stt.provider, "assemblyai");
        let other = assistants.resolve(&CallIdentity::new("other", "c")).unwrap();
        assert_eq!(other.tts.provider, "cartesia");
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
server:
  host: "127.0.0.1"
  port: 8080

providers:
  deepgram_api_key: "yaml-key"

calls:
  default_stt_provider: "deepgram"
"#,
        )
        .unwrap();

        unsafe {
            std::env::set_var("HOST", "0.0.0.0");
            std::env::set_var("DEEPGRAM_API_KEY", "env-key");
            std::env::set_var("TWILIO_ACCOUNT_SID", "env-sid");
            std::env::set_var("DEFAULT_TTS_PROVIDER", "cartesia");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.deepgram_api_key, Some("yaml-key".to_string()));
        // Not in YAML, so ENV fills it
        assert_eq!(config.twilio_account_sid, Some("env-sid".to_string()));
        assert_eq!(config.default_stt_provider.as_deref(), Some("deepgram"));
        assert_eq!(config.default_tts_provider.as_deref(), Some("cartesia"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let result = ServerConfig::from_file(&PathBuf::from("/nonexistent/config.yaml"));
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    #[serial]
    fn test_from_file_validates_auth() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "auth:\n  required: true\n").unwrap();
        assert!(ServerConfig::from_file(&config_path).is_err());

        fs::write(
            &config_path,
            "auth:\n  required: true\n  api_secrets:\n    - id: ops\n      secret: abc\n",
        )
        .unwrap();
        let config = ServerConfig::from_file(&config_path).unwrap();
        assert!(config.auth_required);
        assert_eq!(config.find_api_secret_id("abc"), Some("ops"));
        assert_eq!(config.find_api_secret_id("abd"), None);
    }
}
