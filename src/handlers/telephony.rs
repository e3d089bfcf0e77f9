//! Call-control webhooks
//!
//! - `POST /v1/talk/{carrier}/call`: place an outbound call (protected)
//! - `GET|POST /v1/talk/{carrier}/inbound/{assistant_id}`: answer a call
//! - `POST /v1/talk/{carrier}/event/{context_id}`: carrier status callback
//!
//! Placing or answering a call saves a [`CallContext`]; the carrier's media
//! socket claims it on connect.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::carrier::CarrierKind;
use crate::core::streamer::CallIdentity;
use crate::core::telephony::{
    CallContext, CallControl, CallDirection, create_call_control,
};
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

/// Statuses after which a call will not connect anymore.
const TERMINAL_STATUSES: &[&str] = &[
    "completed",
    "failed",
    "busy",
    "no-answer",
    "canceled",
    "cancelled",
    "rejected",
    "unanswered",
    "timeout",
    "stream-stopped",
];

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceCallRequest {
    /// Number to dial.
    pub to: String,
    /// Caller id presented to the callee.
    pub from: String,
    pub assistant_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaceCallResponse {
    pub context_id: String,
    pub conversation_id: String,
    pub channel_id: String,
    pub status: String,
}

fn telephony_kind(carrier: &str) -> AppResult<CarrierKind> {
    let kind: CarrierKind = carrier
        .parse()
        .map_err(|e| AppError::NotFound(format!("{e}")))?;
    if !kind.is_telephony() {
        return Err(AppError::NotFound(format!(
            "carrier '{kind}' has no call-control API"
        )));
    }
    Ok(kind)
}

fn call_control(
    state: &AppState,
    kind: CarrierKind,
    identity: &CallIdentity,
) -> AppResult<Arc<dyn CallControl>> {
    let credential = state.credentials.carrier(identity, kind)?;
    Ok(create_call_control(kind, &credential, state.http.clone())?)
}

/// Place an outbound call and connect it to an assistant.
pub async fn place_call(
    State(state): State<Arc<AppState>>,
    Path(carrier): Path<String>,
    Json(request): Json<PlaceCallRequest>,
) -> AppResult<Json<PlaceCallResponse>> {
    let kind = telephony_kind(&carrier)?;
    if request.to.trim().is_empty() || request.from.trim().is_empty() {
        return Err(AppError::BadRequest("'to' and 'from' are required".into()));
    }

    let conversation_id = request
        .conversation_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut identity =
        CallIdentity::new(request.assistant_id, conversation_id).with_caller(request.to.as_str());
    if let Some(version) = request.version {
        identity.version = version;
    }

    let control = call_control(&state, kind, &identity)?;
    let context = CallContext::new(kind, identity, CallDirection::Outbound);
    let leg = state.config.callback_urls().leg(kind, &context);
    let context_id = state.contexts.save(context.clone()).await;

    let placed = match control.place_call(&request.to, &request.from, &leg).await {
        Ok(placed) => placed,
        Err(e) => {
            state.contexts.delete(&context_id).await;
            return Err(e.into());
        }
    };
    // The media socket may already have claimed the context
    if let Err(e) = state
        .contexts
        .set_channel_id(&context_id, &placed.channel_id)
        .await
    {
        debug!(context_id = %context_id, error = %e, "Context claimed before channel id update");
    }

    info!(
        carrier = %kind,
        context_id = %context_id,
        channel_id = %placed.channel_id,
        status = %placed.status,
        "Outbound call placed"
    );

    Ok(Json(PlaceCallResponse {
        context_id,
        conversation_id: context.identity.conversation_id.clone(),
        channel_id: placed.channel_id,
        status: placed.status,
    }))
}

/// Answer an inbound call with the carrier's connect markup.
///
/// Parameters are read from the query string and, for form posts, the
/// body. A context id echoed back by the carrier resumes an existing
/// context instead of creating one.
pub async fn inbound_call(
    State(state): State<Arc<AppState>>,
    Path((carrier, assistant_id)): Path<(String, String)>,
    Query(mut params): Query<HashMap<String, String>>,
    body: Bytes,
) -> AppResult<Response> {
    let kind = telephony_kind(&carrier)?;
    if !body.is_empty() {
        params.extend(url::form_urlencoded::parse(&body).into_owned());
    }

    let lookup = CallIdentity::new(assistant_id.as_str(), "");
    let control = call_control(&state, kind, &lookup)?;
    let inbound = control.inbound_call(&params);

    let resumed = match inbound.context_id.as_deref() {
        Some(id) => state.contexts.get(id).await.ok(),
        None => None,
    };
    let context = match resumed {
        Some(context) => context,
        None => {
            let mut identity =
                CallIdentity::new(assistant_id.as_str(), uuid::Uuid::new_v4().to_string());
            identity.caller = inbound.caller.clone();
            identity.channel_id = inbound.channel_id.clone();
            let context = CallContext::new(kind, identity, CallDirection::Inbound);
            state.contexts.save(context.clone()).await;
            context
        }
    };

    info!(
        carrier = %kind,
        context_id = %context.context_id,
        caller = ?inbound.caller,
        channel_id = ?inbound.channel_id,
        direction = ?context.direction,
        "Answering call"
    );

    let leg = state.config.callback_urls().leg(kind, &context);
    let answer = control.answer(&leg)?;
    Ok(([(header::CONTENT_TYPE, answer.content_type)], answer.body).into_response())
}

/// Record a carrier status callback.
///
/// A terminal status drops a context that was never claimed by a media
/// socket.
pub async fn call_event(
    State(state): State<Arc<AppState>>,
    Path((carrier, context_id)): Path<(String, String)>,
    body: Bytes,
) -> AppResult<StatusCode> {
    let kind = telephony_kind(&carrier)?;
    let lookup = CallIdentity::new("", context_id.as_str());
    let control = call_control(&state, kind, &lookup)?;

    let status = control.parse_status(&body)?;
    info!(carrier = %kind, context_id = %context_id, status = %status, "Call status event");

    if is_terminal(&status) {
        if state.contexts.get(&context_id).await.is_ok() {
            warn!(context_id = %context_id, status = %status, "Call ended before media connected");
        }
        state.contexts.delete(&context_id).await;
    }
    Ok(StatusCode::OK)
}

fn is_terminal(status: &str) -> bool {
    let status = status.to_ascii_lowercase();
    TERMINAL_STATUSES.contains(&status.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(is_terminal("completed"));
        assert!(is_terminal("No-Answer"));
        assert!(is_terminal("stream-stopped"));
        assert!(!is_terminal("ringing"));
        assert!(!is_terminal("stream-started"));
    }

    #[test]
    fn test_telephony_kind() {
        assert_eq!(telephony_kind("Twilio").unwrap(), CarrierKind::Twilio);
        assert!(matches!(telephony_kind("native"), Err(AppError::NotFound(_))));
        assert!(matches!(telephony_kind("skype"), Err(AppError::NotFound(_))));
    }
}
