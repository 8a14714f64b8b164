use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// API failure taxonomy. Transport absence (pushing to a user with no live
/// session) is deliberately not here: it is an expected outcome, absorbed
/// by the dispatcher, never surfaced to callers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing/invalid content, unsupported media type. Rejected before any
    /// persistence.
    #[error("{0}")]
    Validation(String),

    /// Acting on a conversation/message/status the requester does not own
    /// or participate in.
    #[error("{0}")]
    Authorization(String),

    /// Referenced entity absent.
    #[error("{0}")]
    NotFound(String),

    /// Username already taken.
    #[error("{0}")]
    Conflict(String),

    /// Durable store or media collaborator failure. Detail is logged, not
    /// leaked to the client.
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Authorization(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::Upstream(e) => {
                error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
