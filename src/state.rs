use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::config::ServerConfig;
use crate::core::carrier::{PeerSignaling, RtcPeerConnector};
use crate::core::talking::{
    CallServices, ConversationHandler, EchoResponder, ProviderFactory, TranscriptRelay,
};
use crate::core::telephony::{CallContextStore, CredentialResolver, http_client};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Application state shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    /// Pending call contexts between call setup and media connect.
    pub contexts: CallContextStore,
    pub credentials: Arc<dyn CredentialResolver>,
    /// Collaborators handed to every call orchestrator.
    pub services: CallServices,
    /// Client for carrier REST APIs.
    pub http: reqwest::Client,
    /// Opens peer connections for WebRTC clients.
    pub signaling: Arc<dyn PeerSignaling>,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    /// Build state from configuration.
    ///
    /// # Errors
    /// Fails when carrier credentials cannot be loaded or the HTTP client
    /// cannot be built.
    pub async fn new(config: ServerConfig) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let credentials: Arc<dyn CredentialResolver> = Arc::new(config.credentials()?);
        let handler: Arc<dyn ConversationHandler> = if config.echo_transcripts {
            Arc::new(EchoResponder)
        } else {
            Arc::new(TranscriptRelay)
        };
        let services = CallServices {
            factory: Arc::new(ProviderFactory::new(credentials.clone())),
            assistants: Arc::new(config.assistant_profiles()),
            handler,
            recording_dir: config.recording_path.clone(),
        };
        Self::with_services(config, credentials, services)
    }

    /// Build state around explicit collaborators.
    pub fn with_services(
        config: ServerConfig,
        credentials: Arc<dyn CredentialResolver>,
        services: CallServices,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let contexts = CallContextStore::new(config.call_context_ttl());
        let http = http_client()?;
        let signaling: Arc<dyn PeerSignaling> =
            Arc::new(RtcPeerConnector::new(config.webrtc_ice_servers.clone()));
        Ok(Arc::new(Self {
            config,
            contexts,
            credentials,
            services,
            http,
            signaling,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        }))
    }

    /// Reserve a WebSocket slot for `ip`.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        // Hold the per-IP entry while touching the global counter
        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        let max = self.config.max_websocket_connections;
        let acquired = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match max {
                Some(limit) if current >= limit => None,
                _ => Some(current + 1),
            })
            .is_ok();
        if !acquired {
            drop(per_ip);
            self.ip_connections.remove_if(&ip, |_, count| *count == 0);
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        *per_ip += 1;
        Ok(())
    }

    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if let Some(mut count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        self.ip_connections.remove_if(&ip, |_, count| *count == 0);
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|c| *c).unwrap_or(0)
    }
}
