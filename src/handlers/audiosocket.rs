//! Asterisk AudioSocket listener
//!
//! The dialplan first reserves a call context through
//! `POST /v1/talk/audiosocket/context`, then runs
//! `AudioSocket(<context_id>,<host>:<port>)`. Asterisk opens a TCP
//! connection whose first frame carries that id.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use super::talk::run_call;
use crate::core::carrier::CarrierKind;
use crate::core::carrier::audiosocket::{AudioSocketStreamer, framed, read_context_id};
use crate::core::streamer::CallIdentity;
use crate::core::telephony::{CallContext, CallDirection};
use crate::errors::app_error::{AppError, AppResult};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Time Asterisk gets to send the uuid frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct AudioSocketContextRequest {
    pub assistant_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub caller: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioSocketContextResponse {
    pub context_id: String,
    pub conversation_id: String,
}

/// Reserve a context for an upcoming AudioSocket connection.
pub async fn create_context(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AudioSocketContextRequest>,
) -> AppResult<Json<AudioSocketContextResponse>> {
    if request.assistant_id.trim().is_empty() {
        return Err(AppError::BadRequest("'assistant_id' is required".into()));
    }
    let conversation_id = request
        .conversation_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut identity = CallIdentity::new(request.assistant_id, conversation_id.as_str());
    identity.caller = request.caller;
    identity.channel_id = request.channel_id;

    let context = CallContext::new(CarrierKind::AudioSocket, identity, CallDirection::Inbound);
    let context_id = state.contexts.save(context).await;
    Ok(Json(AudioSocketContextResponse {
        context_id,
        conversation_id,
    }))
}

/// Accept AudioSocket connections until the listener fails.
pub async fn serve_audiosocket(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "AudioSocket listener started");
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "AudioSocket accept error");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(handle_connection(stream, peer, state));
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<AppState>) {
    if let Err(e) = state.try_acquire_connection(peer.ip()) {
        warn!(peer = %peer, error = ?e, "Rejecting AudioSocket connection");
        return;
    }
    let client = ClientIp::new(state.clone(), peer.ip());

    let (mut reader, writer) = framed(stream);
    let context_id = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_context_id(&mut reader)).await
    {
        Ok(Ok(id)) => id,
        Ok(Err(e)) => {
            warn!(peer = %peer, error = %e, "AudioSocket failed to read uuid frame");
            return;
        }
        Err(_) => {
            warn!(peer = %peer, "AudioSocket uuid frame timed out");
            return;
        }
    };

    let context = match state.contexts.take(&context_id).await {
        Ok(context) if context.carrier == CarrierKind::AudioSocket => context,
        Ok(context) => {
            warn!(context_id = %context_id, carrier = %context.carrier, "Context belongs to another carrier");
            return;
        }
        Err(e) => {
            warn!(context_id = %context_id, error = %e, "AudioSocket session resolution failed");
            return;
        }
    };

    info!(
        context_id = %context_id,
        conversation_id = %context.identity.conversation_id,
        peer = %peer,
        "AudioSocket call connected"
    );
    let streamer = AudioSocketStreamer::new(
        reader,
        writer,
        context.identity,
        state.config.buffer_options(),
    );
    run_call(Arc::new(streamer), state.services.clone()).await;
    drop(client);
}
