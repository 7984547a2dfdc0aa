use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_shared::protocol::{ErrorKind, ServerEvent};
use parley_shared::{TokenError, UserId};
use parley_store::StoreError;

/// Why a connection could not be authenticated. Always fatal for the
/// connection, never retried.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No credential presented")]
    MissingCredential,

    #[error("Credential rejected: {0}")]
    Token(#[from] TokenError),

    #[error("No account for user {0}")]
    UnknownUser(UserId),

    #[error("Identity lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// Failure of a single inbound event. Reported back to the originating
/// connection; the session keeps running.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Invalid(_) => ErrorKind::Invalid,
            EngineError::RateLimited => ErrorKind::RateLimited,
            EngineError::Store(_) => ErrorKind::Store,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Acknowledgment pushed to the client. Store and internal details stay
    /// in the server log.
    pub fn to_event(&self) -> ServerEvent {
        let message = match self {
            EngineError::Store(_) => "Storage failure, the request was not applied".to_string(),
            EngineError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        ServerEvent::error(self.kind(), message)
    }
}

/// Errors returned by the HTTP API.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Store(StoreError::Timeout(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Storage timed out".to_string())
            }
            ServerError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
