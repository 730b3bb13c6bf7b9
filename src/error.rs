use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Every failure the console can observe. All of them are recoverable at the
/// boundary where they occur; none leaves a session half-transitioned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    /// Rejected before any request is sent (e.g. empty target).
    #[error("invalid input: {0}")]
    Validation(String),
    /// Event channel or request/response failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend reported a failed scan through a `scan_error` event.
    #[error("scan {scan_id} failed: {message}")]
    BackendReported { scan_id: String, message: String },
    /// Unknown or evicted session id.
    #[error("scan {0} not found; its data may have expired")]
    NotFound(String),
    /// History could not be persisted; the in-memory log is still current.
    #[error("history storage degraded: {0}")]
    StorageDegraded(String),
    /// A lifecycle event that the session's current status does not allow.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl ConsoleError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConsoleError::Validation(_) => "validation",
            ConsoleError::Transport(_) => "transport",
            ConsoleError::BackendReported { .. } => "backend_reported",
            ConsoleError::NotFound(_) => "not_found",
            ConsoleError::StorageDegraded(_) => "storage_degraded",
            ConsoleError::InvalidTransition(_) => "invalid_transition",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ConsoleError::Validation(_) => StatusCode::BAD_REQUEST,
            ConsoleError::Transport(_) => StatusCode::BAD_GATEWAY,
            ConsoleError::BackendReported { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ConsoleError::NotFound(_) => StatusCode::NOT_FOUND,
            ConsoleError::StorageDegraded(_) => StatusCode::INSUFFICIENT_STORAGE,
            ConsoleError::InvalidTransition(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ConsoleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(kind = self.kind(), error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
