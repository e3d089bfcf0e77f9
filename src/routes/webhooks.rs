//! Carrier webhook routes
//!
//! Carriers cannot present our API secret, so these routes are public. The
//! carrier media socket still needs a context id that only a webhook or
//! place-call response hands out.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::telephony::{call_event, inbound_call};
use crate::state::AppState;
use std::sync::Arc;

pub fn create_webhook_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/v1/talk/{carrier}/inbound/{assistant_id}",
            get(inbound_call).post(inbound_call),
        )
        .route("/v1/talk/{carrier}/event/{context_id}", post(call_event))
        .layer(TraceLayer::new_for_http())
}
