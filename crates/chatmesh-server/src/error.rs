use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chatmesh_store::StoreError;
use chatmesh_sync::{ApplyError, ReceiveError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::PreconditionFailed(_) => {
                (StatusCode::PRECONDITION_FAILED, self.to_string())
            }
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("no such record".into()),
            StoreError::Conflict(msg) => ServerError::Conflict(msg),
            StoreError::Precondition(msg) => ServerError::PreconditionFailed(msg),
            StoreError::Protocol(e) => ServerError::BadRequest(e.to_string()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<ApplyError> for ServerError {
    fn from(e: ApplyError) -> Self {
        match e {
            ApplyError::DependencyNotFound { .. } => ServerError::NotFound(e.to_string()),
            ApplyError::MalformedRecord(msg) => ServerError::BadRequest(msg),
            ApplyError::Store(e) => e.into(),
        }
    }
}

impl From<ReceiveError> for ServerError {
    fn from(e: ReceiveError) -> Self {
        match e {
            ReceiveError::Unauthorized(msg) => ServerError::Unauthorized(msg),
            ReceiveError::BadRequest(msg) => ServerError::BadRequest(msg),
            ReceiveError::Failed(msg) => ServerError::Internal(msg),
        }
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(e: tokio::task::JoinError) -> Self {
        ServerError::Internal(format!("blocking task failed: {e}"))
    }
}
