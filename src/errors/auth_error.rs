use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Error codes for structured error responses
pub mod error_codes {
    pub const MISSING_AUTH_HEADER: &str = "missing_auth_header";
    pub const INVALID_AUTH_HEADER: &str = "invalid_auth_header";
    pub const UNAUTHORIZED: &str = "unauthorized";
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    /// Neither an Authorization header nor a `token` query parameter
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    /// Authorization header is not "Bearer {token}"
    #[error("Invalid Authorization header format")]
    InvalidAuthHeader,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl AuthError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => error_codes::MISSING_AUTH_HEADER,
            AuthError::InvalidAuthHeader => error_codes::INVALID_AUTH_HEADER,
            AuthError::Unauthorized(_) => error_codes::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.error_code(),
            "message": self.to_string(),
        }));
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AuthError::MissingAuthHeader.error_code(), "missing_auth_header");
        assert_eq!(
            AuthError::Unauthorized("nope".into()).to_string(),
            "Unauthorized: nope"
        );
        assert_eq!(
            AuthError::InvalidAuthHeader.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
