//! Connection limits for media WebSockets.
//!
//! Every carrier, native and WebRTC socket holds one slot for the life of
//! its call. Slots are bounded globally and per client IP.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Client address of a request that holds a connection slot.
///
/// The slot is released when the last clone is dropped, so a handler keeps
/// it for the call by moving a clone into the socket task.
#[derive(Clone)]
pub struct ClientIp {
    pub ip: IpAddr,
    _slot: Arc<ConnectionSlot>,
}

impl ClientIp {
    pub fn new(state: Arc<AppState>, ip: IpAddr) -> Self {
        Self {
            ip,
            _slot: Arc::new(ConnectionSlot { state, ip }),
        }
    }
}

impl std::fmt::Debug for ClientIp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ClientIp").field(&self.ip).finish()
    }
}

struct ConnectionSlot {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}

/// Reserve a connection slot for WebSocket upgrades.
///
/// Answers 503 when the gateway is full and 429 when the client IP is.
/// Non-upgrade requests pass through untouched. The handler owns the
/// reserved slot through the injected [`ClientIp`].
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let client_ip = addr.ip();

    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request
                .extensions_mut()
                .insert(ClientIp::new(state.clone(), client_ip));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting connection: global limit reached"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Gateway at call capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting connection: per-IP limit reached"
            );
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many concurrent calls from your IP address.",
            )
                .into_response()
        }
    }
}
