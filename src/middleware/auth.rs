use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::AuthApiSecret;
use crate::errors::auth_error::AuthError;
use crate::state::AppState;

/// Id of the API secret a request authenticated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthId(pub Option<String>);

fn api_secret_matches(token: &str, secret: &str) -> bool {
    bool::from(token.as_bytes().ct_eq(secret.as_bytes()))
}

/// Match a bearer token against the configured secrets in constant time.
pub fn match_api_secret_id<'a>(token: &str, secrets: &'a [AuthApiSecret]) -> Option<&'a str> {
    secrets
        .iter()
        .find(|entry| api_secret_matches(token, &entry.secret))
        .map(|entry| entry.id.as_str())
}

/// Extract the bearer token.
///
/// Sources, in order:
/// 1. `Authorization: Bearer <token>`
/// 2. `?token=<token>` for WebSocket clients that cannot set headers
fn extract_token(request: &Request) -> Result<String, AuthError> {
    if let Some(auth_header) = request.headers().get("authorization") {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        return auth_str
            .strip_prefix("Bearer ")
            .map(str::to_string)
            .ok_or(AuthError::InvalidAuthHeader);
    }

    if let Some(query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "token" {
                return Ok(value.into_owned());
            }
        }
    }

    Err(AuthError::MissingAuthHeader)
}

/// Bearer-token authentication against the configured API secrets.
///
/// Passes everything through when `auth_required` is off. On success the
/// matched secret id is inserted as an [`AuthId`] extension.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if !state.config.auth_required {
        request.extensions_mut().insert(AuthId(None));
        return Ok(next.run(request).await);
    }

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let token = extract_token(&request)?;

    match state.config.find_api_secret_id(&token) {
        Some(secret_id) => {
            tracing::debug!(method = %method, path = %path, auth_id = %secret_id, "Authenticated request");
            let id = secret_id.to_string();
            request.extensions_mut().insert(AuthId(Some(id)));
            Ok(next.run(request).await)
        }
        None => {
            tracing::warn!(method = %method, path = %path, "API secret authentication failed");
            Err(AuthError::Unauthorized("Invalid API secret".to_string()))
        }
    }
}
