//! Media WebSocket route configuration
//!
//! `GET /v1/talk/native` and `GET /v1/talk/webrtc` take the caller identity
//! from `?assistant_id=...&conversation_id=...`. Carrier streams connect to
//! `GET /v1/talk/{carrier}/ctx/{context_id}` with the id handed out at call
//! setup.
//!
//! Connection limits and authentication are layered on in main.rs.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::talk::{carrier_media_handler, native_handler, webrtc_handler};
use crate::state::AppState;
use std::sync::Arc;

pub fn create_talk_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/talk/native", get(native_handler))
        .route("/v1/talk/webrtc", get(webrtc_handler))
        .route(
            "/v1/talk/{carrier}/ctx/{context_id}",
            get(carrier_media_handler),
        )
        .layer(TraceLayer::new_for_http())
}
