use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failure taxonomy for the auth core. Client-facing messages stay generic;
/// the variant carries the real reason for logging and branching.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("incorrect email or password")]
    InvalidCredentials,

    #[error("inactive user")]
    AccountInactive,

    /// Malformed, bad signature, expired, revoked or unknown token.
    /// Collapsed on purpose so a caller holding a stale token learns nothing.
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("user not found")]
    UserNotFound,

    #[error("not authenticated")]
    Unauthenticated,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("storage error: {0}")]
    StoreFault(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::AccountInactive => StatusCode::BAD_REQUEST,
            AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::UserNotFound => StatusCode::UNAUTHORIZED,
            AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::StoreFault(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            // Never leak store or signing internals to the client.
            AuthError::StoreFault(_) | AuthError::Internal(_) => "Internal server error".into(),
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
