//! Media WebSocket handlers
//!
//! Every socket becomes one [`Streamer`] driven by one [`Talking`]
//! orchestrator for the life of the call.
//!
//! - `GET /v1/talk/{carrier}/ctx/{context_id}`: carrier media stream. The
//!   context saved at call setup is claimed here and cannot be reused.
//! - `GET /v1/talk/native`: the gateway's JSON client protocol.
//! - `GET /v1/talk/webrtc`: peer connection signaling, or media over the socket.

use std::sync::Arc;

use axum::{
    Extension,
    extract::{Path, Query, State, ws::WebSocketUpgrade},
    response::Response,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::core::carrier::{CarrierKind, CarrierOptions, create_streamer};
use crate::core::streamer::{CallIdentity, Streamer};
use crate::core::talking::{CallServices, Talking};
use crate::core::telephony::{CallTerminator, create_terminator};
use crate::core::transport::MediaTransport;
use crate::errors::app_error::{AppError, AppResult};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Maximum WebSocket message size (1 MB). Media frames are far smaller.
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Identity of a native or WebRTC client, from the query string.
#[derive(Debug, Clone, Deserialize)]
pub struct TalkQuery {
    pub assistant_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl TalkQuery {
    fn identity(self) -> CallIdentity {
        let conversation_id = self
            .conversation_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut identity = CallIdentity::new(self.assistant_id, conversation_id);
        if let Some(version) = self.version {
            identity.version = version;
        }
        identity
    }
}

/// Media stream of a call placed or answered through the call webhooks.
pub async fn carrier_media_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path((carrier, context_id)): Path<(String, String)>,
    Extension(client): Extension<ClientIp>,
) -> AppResult<Response> {
    let kind: CarrierKind = carrier
        .parse()
        .map_err(|e| AppError::BadRequest(format!("{e}")))?;
    if !kind.is_telephony() {
        return Err(AppError::NotFound(format!(
            "carrier '{kind}' has no call context route"
        )));
    }

    let context = state.contexts.take(&context_id).await?;
    if context.carrier != kind {
        return Err(AppError::BadRequest(format!(
            "context {context_id} belongs to {}, not {kind}",
            context.carrier
        )));
    }

    info!(
        carrier = %kind,
        context_id = %context_id,
        conversation_id = %context.identity.conversation_id,
        direction = ?context.direction,
        "Carrier media stream requested"
    );

    let terminator = terminator_for(&state, kind, &context.identity);
    let options = CarrierOptions {
        buffers: state.config.buffer_options(),
        terminator,
        ..CarrierOptions::default()
    };
    let services = state.services.clone();
    let identity = context.identity;

    Ok(ws
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| {
            serve_socket(
                kind,
                MediaTransport::from_axum(socket),
                identity,
                options,
                services,
                client,
            )
        }))
}

/// Native client stream.
pub async fn native_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<TalkQuery>,
    Extension(client): Extension<ClientIp>,
) -> Response {
    client_socket(ws, state, CarrierKind::Native, query.identity(), client)
}

/// WebRTC client stream.
pub async fn webrtc_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<TalkQuery>,
    Extension(client): Extension<ClientIp>,
) -> Response {
    client_socket(ws, state, CarrierKind::WebRtc, query.identity(), client)
}

fn client_socket(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    kind: CarrierKind,
    identity: CallIdentity,
    client: ClientIp,
) -> Response {
    info!(
        carrier = %kind,
        assistant_id = %identity.assistant_id,
        conversation_id = %identity.conversation_id,
        ip = %client.ip,
        "Client media stream requested"
    );
    let options = CarrierOptions {
        buffers: state.config.buffer_options(),
        signaling: (kind == CarrierKind::WebRtc).then(|| state.signaling.clone()),
        ..CarrierOptions::default()
    };
    let services = state.services.clone();

    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| {
            serve_socket(
                kind,
                MediaTransport::from_axum(socket),
                identity,
                options,
                services,
                client,
            )
        })
}

/// Hang-up client for carriers that support it. A missing or broken
/// credential only disables remote hang-up.
fn terminator_for(
    state: &AppState,
    kind: CarrierKind,
    identity: &CallIdentity,
) -> Option<Arc<dyn CallTerminator>> {
    let credential = match state.credentials.carrier(identity, kind) {
        Ok(credential) => credential,
        Err(e) => {
            warn!(carrier = %kind, error = %e, "Remote hang-up unavailable");
            return None;
        }
    };
    match create_terminator(kind, &credential, state.http.clone()) {
        Ok(terminator) => terminator,
        Err(e) => {
            warn!(carrier = %kind, error = %e, "Remote hang-up unavailable");
            None
        }
    }
}

async fn serve_socket(
    kind: CarrierKind,
    transport: MediaTransport,
    identity: CallIdentity,
    options: CarrierOptions,
    services: CallServices,
    client: ClientIp,
) {
    match create_streamer(kind, transport, identity, options) {
        Ok(streamer) => run_call(Arc::from(streamer), services).await,
        Err(e) => warn!(carrier = %kind, error = %e, "Failed to create streamer"),
    }
    drop(client);
}

/// Drive one call to completion.
pub async fn run_call(streamer: Arc<dyn Streamer>, services: CallServices) {
    let conversation_id = streamer.identity().conversation_id.clone();
    let mut talking = Talking::new(streamer, services);
    if let Err(e) = talking.run().await {
        warn!(conversation_id = %conversation_id, error = %e, "Call ended with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_identity() {
        let query = TalkQuery {
            assistant_id: "sales".into(),
            conversation_id: Some("conv-1".into()),
            version: Some("v2".into()),
        };
        let identity = query.identity();
        assert_eq!(identity.assistant_id, "sales");
        assert_eq!(identity.conversation_id, "conv-1");
        assert_eq!(identity.version, "v2");

        let generated = TalkQuery {
            assistant_id: "sales".into(),
            conversation_id: None,
            version: None,
        }
        .identity();
        assert_eq!(generated.version, "latest");
        assert!(uuid::Uuid::parse_str(&generated.conversation_id).is_ok());
    }
}
