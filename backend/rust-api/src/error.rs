use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API-wide error taxonomy. Every handler returns `Result<_, ApiError>`
/// and the `IntoResponse` impl is the single place errors become HTTP.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Riddle generator timed out")]
    UpstreamTimeout,

    #[error("Riddle generator request failed: {0}")]
    UpstreamError(String),

    #[error("Riddle generator returned an unusable payload: {0}")]
    MalformedResponse(String),

    #[error("Game session not found")]
    SessionNotFound,

    #[error("Game session is not active")]
    SessionInactive,

    #[error("Email or username already registered")]
    DuplicateRegistration,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::UpstreamError(_) | ApiError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
            ApiError::SessionNotFound => StatusCode::NOT_FOUND,
            ApiError::SessionInactive | ApiError::DuplicateRegistration => StatusCode::CONFLICT,
            ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code, also used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::UpstreamTimeout => "upstream_timeout",
            ApiError::UpstreamError(_) => "upstream_error",
            ApiError::MalformedResponse(_) => "malformed_response",
            ApiError::SessionNotFound => "session_not_found",
            ApiError::SessionInactive => "session_inactive",
            ApiError::DuplicateRegistration => "duplicate_registration",
            ApiError::InvalidCredentials => "invalid_credentials",
            ApiError::ValidationError(_) => "validation_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details never reach the client.
        let message = match &self {
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                "Internal server error".to_string()
            }
            other => {
                if status.is_server_error() {
                    tracing::error!("Request failed: {}", other);
                } else {
                    tracing::warn!("Request rejected: {}", other);
                }
                other.to_string()
            }
        };

        (
            status,
            Json(json!({
                "error": self.kind(),
                "message": message,
            })),
        )
            .into_response()
    }
}

impl From<mongodb::error::Error> for ApiError {
    fn from(e: mongodb::error::Error) -> Self {
        ApiError::Internal(anyhow::Error::new(e).context("MongoDB operation failed"))
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(e.to_string())
    }
}
