use axum::{Router, routing::post};
use tower_http::trace::TraceLayer;

use crate::handlers::{audiosocket, telephony};
use crate::state::AppState;
use std::sync::Arc;

/// Create the API router with protected routes
///
/// Note: Authentication middleware should be applied in main.rs after state is available
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Protected routes (auth required when AUTH_REQUIRED=true)
        .route(
            "/v1/talk/audiosocket/context",
            post(audiosocket::create_context),
        )
        .route("/v1/talk/{carrier}/call", post(telephony::place_call))
        .layer(TraceLayer::new_for_http())
}
