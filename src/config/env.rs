use super::ServerConfig;
use super::merge::merge_config;

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Also loads a `.env` file if present using dotenvy.
    ///
    /// # Errors
    /// Returns an error if an environment variable is malformed or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let _ = dotenvy::dotenv();

        let config = merge_config(None)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "HOST",
        "PORT",
        "PUBLIC_HOST",
        "DEEPGRAM_API_KEY",
        "TWILIO_ACCOUNT_SID",
        "TWILIO_AUTH_TOKEN",
        "INPUT_BUFFER_MS",
        "OUTPUT_FRAME_MS",
        "AUTH_REQUIRED",
        "AUTH_API_SECRET",
        "AUTH_API_SECRET_ID",
        "AUTH_API_SECRETS_JSON",
        "MAX_WEBSOCKET_CONNECTIONS",
        "AUDIOSOCKET_PORT",
        "TLS_ENABLED",
        "WEBRTC_ICE_SERVERS",
    ];

    fn cleanup_env_vars() {
        unsafe {
            for var in VARS {
                env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3001);
        assert_eq!(config.input_buffer_ms, 60);
        assert_eq!(config.output_frame_ms, 20);
        assert_eq!(config.call_context_ttl_seconds, 300);
        assert!(config.audiosocket_port.is_none());
        assert!(!config.auth_required);
        assert!(config.tls.is_none());
        assert_eq!(
            config.webrtc_ice_servers,
            vec!["stun:stun.l.google.com:19302".to_string()]
        );
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PORT", "8088");
            env::set_var("PUBLIC_HOST", "voice.example.com");
            env::set_var("DEEPGRAM_API_KEY", "dg");
            env::set_var("TWILIO_ACCOUNT_SID", "AC1");
            env::set_var("AUTH_REQUIRED", "yes");
            env::set_var("AUTH_API_SECRET", "s3cret");
            env::set_var("MAX_WEBSOCKET_CONNECTIONS", "25");
            env::set_var("AUDIOSOCKET_PORT", "9092");
            env::set_var("WEBRTC_ICE_SERVERS", "stun:a:3478,turn:b:3478");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, 8088);
        assert_eq!(config.public_host.as_deref(), Some("voice.example.com"));
        assert_eq!(config.deepgram_api_key.as_deref(), Some("dg"));
        assert_eq!(config.twilio_account_sid.as_deref(), Some("AC1"));
        assert!(config.auth_required);
        assert_eq!(config.auth_api_secrets.len(), 1);
        assert_eq!(config.auth_api_secrets[0].id, "default");
        assert_eq!(config.max_websocket_connections, Some(25));
        assert_eq!(config.audiosocket_port, Some(9092));
        assert_eq!(config.webrtc_ice_servers, ["stun:a:3478", "turn:b:3478"]);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_secrets_json() {
        cleanup_env_vars();
        unsafe {
            env::set_var(
                "AUTH_API_SECRETS_JSON",
                r#"[{"id":"a","secret":"1"},{"id":"b","secret":"2"}]"#,
            );
            env::set_var("AUTH_API_SECRET", "ignored");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.auth_api_secrets.len(), 2);
        assert_eq!(config.find_api_secret_id("2"), Some("b"));
        assert_eq!(config.find_api_secret_id("ignored"), None);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        cleanup_env_vars();

        unsafe { env::set_var("PORT", "not-a-port") };
        let err = ServerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("Invalid PORT"));
        cleanup_env_vars();

        unsafe { env::set_var("AUTH_REQUIRED", "true") };
        assert!(ServerConfig::from_env().is_err());
        cleanup_env_vars();

        unsafe {
            env::set_var("INPUT_BUFFER_MS", "20");
            env::set_var("OUTPUT_FRAME_MS", "40");
        }
        assert!(ServerConfig::from_env().is_err());
        cleanup_env_vars();

        unsafe { env::set_var("TLS_ENABLED", "true") };
        let err = ServerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("TLS_CERT_PATH"));
        cleanup_env_vars();
    }
}
