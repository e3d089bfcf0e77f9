use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, warn};

use axum::{Router, middleware};
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use http::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tokio::net::TcpListener;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing_subscriber::EnvFilter;

use anyhow::anyhow;

use callbridge_gateway::{
    ServerConfig,
    handlers::serve_audiosocket,
    middleware::{auth_middleware, connection_limit_middleware},
    routes,
    state::AppState,
};

/// CallBridge Gateway - telephony and WebRTC media bridge for streaming STT/TTS
#[derive(Parser, Debug)]
#[command(name = "callbridge-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate the configuration, then print a summary
    CheckConfig,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ServerConfig> {
    if let Some(config_path) = path {
        println!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))
    }
}

fn print_summary(config: &ServerConfig) {
    let configured = |value: bool| if value { "configured" } else { "-" };
    println!("address:            {}", config.address());
    println!(
        "public host:        {}",
        config.public_host.as_deref().unwrap_or("(address)")
    );
    println!("tls:                {}", config.is_tls_enabled());
    println!(
        "audiosocket port:   {}",
        config
            .audiosocket_port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into())
    );
    println!("deepgram:           {}", configured(config.deepgram_api_key.is_some()));
    println!("cartesia:           {}", configured(config.cartesia_api_key.is_some()));
    println!("assemblyai:         {}", configured(config.assemblyai_api_key.is_some()));
    println!("twilio:             {}", configured(config.twilio_account_sid.is_some()));
    println!("exotel:             {}", configured(config.exotel_account_sid.is_some()));
    println!(
        "vonage:             {}",
        configured(config.vonage_application_id.is_some())
    );
    println!(
        "default providers:  stt={} tts={}",
        config.default_stt_provider.as_deref().unwrap_or("-"),
        config.default_tts_provider.as_deref().unwrap_or("-")
    );
    println!("assistant profiles: {}", config.assistants.len());
    println!(
        "buffers:            input {}ms, output frame {}ms",
        config.input_buffer_ms, config.output_frame_ms
    );
    println!("auth required:      {}", config.auth_required);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Must be installed before any TLS connection is attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    if let Some(Commands::CheckConfig) = cli.command {
        print_summary(&config);
        return Ok(());
    }

    let address = config.address();
    let tls_config = config.tls.clone();
    let is_tls_enabled = config.is_tls_enabled();
    let rate_limit_rps = config.rate_limit_requests_per_second;
    let rate_limit_burst = config.rate_limit_burst_size;
    let cors_origins = config.cors_allowed_origins.clone();
    let audiosocket_addr = config
        .audiosocket_port
        .map(|port| format!("{}:{}", config.host, port));
    println!("Starting server on {address}");

    let app_state = AppState::new(config)
        .await
        .map_err(|e| anyhow!("Failed to initialize state: {}", e))?;

    if let Some(addr) = audiosocket_addr {
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow!("Failed to bind AudioSocket listener on {}: {}", addr, e))?;
        let state = app_state.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_audiosocket(listener, state).await {
                warn!(error = %e, "AudioSocket listener stopped");
            }
        });
    }

    // Place-call and AudioSocket context reservation
    let protected_routes = routes::api::create_api_router().layer(middleware::from_fn_with_state(
        app_state.clone(),
        auth_middleware,
    ));

    // Layer order (outer to inner): connection_limit -> auth -> handler
    let talk_routes = routes::talk::create_talk_router()
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            connection_limit_middleware,
        ));

    // Carrier webhooks (no auth)
    let webhook_routes = routes::webhooks::create_webhook_router();

    let public_routes = Router::new().route(
        "/",
        axum::routing::get(callbridge_gateway::handlers::api::health_check),
    );

    // Disabled when rate >= 100000 for load testing
    let governor_layer = if rate_limit_rps < 100000 {
        let governor_config = GovernorConfigBuilder::default()
            .per_second(rate_limit_rps as u64)
            .burst_size(rate_limit_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow!("Failed to build rate limiter config"))?;
        Some(GovernorLayer::new(governor_config))
    } else {
        println!("Rate limiting disabled (rate >= 100000/s)");
        None
    };

    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let cors_layer = match cors_origins.as_deref() {
        Some("*") => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(false),
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(methods)
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(true)
        }
        None => {
            info!(
                "CORS not configured, defaulting to same-origin only. \
                 Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
            );
            // No allow_origin: browsers block cross-origin requests
            CorsLayer::new()
                .allow_methods(methods)
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(false)
        }
    };

    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let app = public_routes
        .merge(webhook_routes)
        .merge(protected_routes)
        .merge(talk_routes)
        .with_state(app_state)
        .layer(cors_layer)
        .layer(tower::util::option_layer(governor_layer))
        .layer(security_headers);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    match tls_config.filter(|_| is_tls_enabled) {
        Some(tls) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .map_err(|e| {
                    anyhow!(
                        "Failed to load TLS certificates from {} and {}: {}",
                        tls.cert_path.display(),
                        tls.key_path.display(),
                        e
                    )
                })?;

            println!("Server listening on https://{} (TLS enabled)", socket_addr);

            axum_server::bind_rustls(socket_addr, rustls_config)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .map_err(|e| anyhow!("TLS server error: {}", e))?;
        }
        None => {
            println!("Server listening on http://{}", socket_addr);

            let listener = TcpListener::bind(&socket_addr).await?;
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await?;
        }
    }

    Ok(())
}
