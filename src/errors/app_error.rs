use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::core::telephony::TelephonyError;

/// Errors returned by the HTTP handlers
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    InternalServerError(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// A carrier API rejected or failed a request.
    #[error("Carrier error: {0}")]
    BadGateway(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Details are logged, never echoed to the caller
        let error_message = match &self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal server error: {}", msg);
                "Internal server error"
            }
            AppError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                "Bad request"
            }
            AppError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                "Resource not found"
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized: {}", msg);
                "Unauthorized"
            }
            AppError::BadGateway(msg) => {
                tracing::error!("Carrier request failed: {}", msg);
                "Carrier request failed"
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<TelephonyError> for AppError {
    fn from(err: TelephonyError) -> Self {
        match err {
            TelephonyError::ContextNotFound(id) => {
                AppError::NotFound(format!("call context {id}"))
            }
            TelephonyError::InvalidPayload(msg) => AppError::BadRequest(msg),
            TelephonyError::Http(msg) | TelephonyError::Carrier(msg) => AppError::BadGateway(msg),
            TelephonyError::Configuration(msg) | TelephonyError::MissingCredential(msg) => {
                AppError::InternalServerError(msg)
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
