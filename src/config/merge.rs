use std::env;
use std::path::PathBuf;

use super::utils::{parse_bool, parse_env_number, parse_list};
use super::yaml::YamlConfig;
use super::{AuthApiSecret, ServerConfig, TlsConfig};
use crate::core::carrier::DEFAULT_ICE_SERVER;

/// Id given to a secret configured through `AUTH_API_SECRET` alone.
const DEFAULT_API_SECRET_ID: &str = "default";

/// Merge YAML configuration with environment variables
///
/// Priority order (highest to lowest):
/// 1. YAML configuration values
/// 2. Environment variables
/// 3. Default values
///
/// Passing `None` yields the environment-only configuration.
pub fn merge_config(
    yaml_config: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let yaml = yaml_config.unwrap_or_default();

    // YAML > ENV > Default
    macro_rules! get_value {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            $yaml_value
                .or_else(|| env::var($env_var).ok())
                .unwrap_or_else(|| $default.to_string())
        };
    }

    // YAML > ENV
    macro_rules! get_optional {
        ($env_var:expr, $yaml_value:expr) => {
            $yaml_value.or_else(|| env::var($env_var).ok())
        };
    }

    // Numeric YAML > ENV > Default, rejecting malformed env values
    macro_rules! get_number {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            match $yaml_value {
                Some(value) => value,
                None => match env::var($env_var) {
                    Ok(raw) => parse_env_number($env_var, &raw)?,
                    Err(_) => $default,
                },
            }
        };
    }

    let server = yaml.server.unwrap_or_default();
    let providers = yaml.providers.unwrap_or_default();
    let carriers = yaml.carriers.unwrap_or_default();
    let twilio = carriers.twilio.unwrap_or_default();
    let exotel = carriers.exotel.unwrap_or_default();
    let vonage = carriers.vonage.unwrap_or_default();
    let calls = yaml.calls.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    // Server
    let host = get_value!("HOST", server.host, "0.0.0.0");
    let port: u16 = get_number!("PORT", server.port, 3001);
    let public_host = get_optional!("PUBLIC_HOST", server.public_host);
    let audiosocket_port: Option<u16> = match server.audiosocket_port {
        Some(port) => Some(port),
        None => match env::var("AUDIOSOCKET_PORT") {
            Ok(raw) => Some(parse_env_number("AUDIOSOCKET_PORT", &raw)?),
            Err(_) => None,
        },
    };
    let tls = merge_tls(server.tls.unwrap_or_default())?;

    // Speech providers
    let deepgram_api_key = get_optional!("DEEPGRAM_API_KEY", providers.deepgram_api_key);
    let cartesia_api_key = get_optional!("CARTESIA_API_KEY", providers.cartesia_api_key);
    let assemblyai_api_key = get_optional!("ASSEMBLYAI_API_KEY", providers.assemblyai_api_key);

    // Carriers
    let twilio_account_sid = get_optional!("TWILIO_ACCOUNT_SID", twilio.account_sid);
    let twilio_auth_token = get_optional!("TWILIO_AUTH_TOKEN", twilio.auth_token);
    let exotel_account_sid = get_optional!("EXOTEL_ACCOUNT_SID", exotel.account_sid);
    let exotel_client_id = get_optional!("EXOTEL_CLIENT_ID", exotel.client_id);
    let exotel_client_secret = get_optional!("EXOTEL_CLIENT_SECRET", exotel.client_secret);
    let exotel_app_id = get_optional!("EXOTEL_APP_ID", exotel.app_id);
    let vonage_application_id = get_optional!("VONAGE_APPLICATION_ID", vonage.application_id);
    let vonage_private_key_path =
        get_optional!("VONAGE_PRIVATE_KEY_PATH", vonage.private_key_path).map(PathBuf::from);

    // Call defaults
    let default_stt_provider = get_optional!("DEFAULT_STT_PROVIDER", calls.default_stt_provider);
    let default_tts_provider = get_optional!("DEFAULT_TTS_PROVIDER", calls.default_tts_provider);
    let input_buffer_ms: u32 = get_number!("INPUT_BUFFER_MS", calls.input_buffer_ms, 60);
    let output_frame_ms: u32 = get_number!("OUTPUT_FRAME_MS", calls.output_frame_ms, 20);
    let call_context_ttl_seconds: u64 =
        get_number!("CALL_CONTEXT_TTL_SECONDS", calls.context_ttl_seconds, 300);

    let echo_transcripts = calls
        .echo_transcripts
        .or_else(|| env::var("ECHO_TRANSCRIPTS").ok().and_then(|v| parse_bool(&v)))
        .unwrap_or(false);

    let recording_path = get_optional!(
        "RECORDING_PATH",
        yaml.recording.and_then(|r| r.path)
    )
    .map(PathBuf::from);

    // WebRTC
    let webrtc_ice_servers = yaml
        .webrtc
        .and_then(|w| w.ice_servers)
        .or_else(|| env::var("WEBRTC_ICE_SERVERS").ok().map(|v| parse_list(&v)))
        .unwrap_or_else(|| vec![DEFAULT_ICE_SERVER.to_string()]);

    // Authentication
    let auth = yaml.auth.unwrap_or_default();
    let auth_api_secrets = if auth.api_secrets.is_empty() {
        api_secrets_from_env()?
    } else {
        auth.api_secrets
            .into_iter()
            .map(|entry| AuthApiSecret {
                id: entry.id,
                secret: entry.secret,
            })
            .collect()
    };
    let auth_required = auth
        .required
        .or_else(|| env::var("AUTH_REQUIRED").ok().and_then(|v| parse_bool(&v)))
        .unwrap_or(false);

    // Security
    let cors_allowed_origins = get_optional!("CORS_ALLOWED_ORIGINS", security.cors_allowed_origins);
    let rate_limit_requests_per_second: u32 = get_number!(
        "RATE_LIMIT_REQUESTS_PER_SECOND",
        security.rate_limit_requests_per_second,
        60
    );
    let rate_limit_burst_size: u32 =
        get_number!("RATE_LIMIT_BURST_SIZE", security.rate_limit_burst_size, 10);
    let max_websocket_connections: Option<usize> = match security.max_websocket_connections {
        Some(limit) => Some(limit),
        None => match env::var("MAX_WEBSOCKET_CONNECTIONS") {
            Ok(raw) => Some(parse_env_number("MAX_WEBSOCKET_CONNECTIONS", &raw)?),
            Err(_) => None,
        },
    };
    let max_connections_per_ip: u32 =
        get_number!("MAX_CONNECTIONS_PER_IP", security.max_connections_per_ip, 100);

    Ok(ServerConfig {
        host,
        port,
        public_host,
        tls,
        audiosocket_port,
        deepgram_api_key,
        cartesia_api_key,
        assemblyai_api_key,
        twilio_account_sid,
        twilio_auth_token,
        exotel_account_sid,
        exotel_client_id,
        exotel_client_secret,
        exotel_app_id,
        vonage_application_id,
        vonage_private_key_path,
        default_stt_provider,
        default_tts_provider,
        input_buffer_ms,
        output_frame_ms,
        call_context_ttl_seconds,
        echo_transcripts,
        recording_path,
        webrtc_ice_servers,
        auth_api_secrets,
        auth_required,
        cors_allowed_origins,
        rate_limit_requests_per_second,
        rate_limit_burst_size,
        max_websocket_connections,
        max_connections_per_ip,
        assistants: yaml.assistants,
    })
}

fn merge_tls(
    tls: super::yaml::TlsYaml,
) -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    let enabled = tls
        .enabled
        .or_else(|| env::var("TLS_ENABLED").ok().and_then(|v| parse_bool(&v)))
        .unwrap_or(false);
    if !enabled {
        return Ok(None);
    }

    let cert_path = tls
        .cert_path
        .or_else(|| env::var("TLS_CERT_PATH").ok())
        .ok_or("TLS_CERT_PATH is required when TLS is enabled")?;
    let key_path = tls
        .key_path
        .or_else(|| env::var("TLS_KEY_PATH").ok())
        .ok_or("TLS_KEY_PATH is required when TLS is enabled")?;

    Ok(Some(TlsConfig {
        cert_path: PathBuf::from(cert_path),
        key_path: PathBuf::from(key_path),
    }))
}

/// `AUTH_API_SECRETS_JSON` (a list of `{id, secret}`) wins over the
/// single `AUTH_API_SECRET`/`AUTH_API_SECRET_ID` pair.
fn api_secrets_from_env() -> Result<Vec<AuthApiSecret>, Box<dyn std::error::Error>> {
    #[derive(serde::Deserialize)]
    struct Entry {
        id: String,
        secret: String,
    }

    if let Ok(raw) = env::var("AUTH_API_SECRETS_JSON") {
        let entries: Vec<Entry> = serde_json::from_str(&raw)
            .map_err(|e| format!("Invalid AUTH_API_SECRETS_JSON: {e}"))?;
        return Ok(entries
            .into_iter()
            .map(|e| AuthApiSecret {
                id: e.id,
                secret: e.secret,
            })
            .collect());
    }

    Ok(env::var("AUTH_API_SECRET")
        .ok()
        .map(|secret| {
            vec![AuthApiSecret {
                id: env::var("AUTH_API_SECRET_ID")
                    .unwrap_or_else(|_| DEFAULT_API_SECRET_ID.to_string()),
                secret,
            }]
        })
        .unwrap_or_default())
}
