//! Client-facing error types.
//!
//! Every variant maps to a stable error code string and an HTTP status.
//! The enum implements [`axum::response::IntoResponse`] so handlers can
//! simply return `Err(KvError::MissingRecord)`; the body is always
//! `{"error": "<CODE>"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors surfaced by the key-value HTTP API.
#[derive(Debug, Error)]
pub enum KvError {
    /// The `k` query parameter is absent.
    #[error("MISSING_KEY_PARAM")]
    MissingKeyParam,

    /// The `k` query parameter is present but empty.
    #[error("EMPTY_KEY")]
    EmptyKey,

    /// The key is at or above the configured maximum length.
    #[error("MAXIMUM_KEY_LENGTH_REACHED")]
    MaximumKeyLengthReached,

    /// The `v` query parameter is absent.
    #[error("MISSING_VALUE_PARAM")]
    MissingValueParam,

    /// The value is at or above the configured maximum length.
    #[error("MAXIMUM_VALUE_LENGTH_REACHED")]
    MaximumValueLengthReached,

    /// No record is stored under the requested key.
    #[error("MISSING_RECORD")]
    MissingRecord,

    /// No handler is registered for the request path.
    #[error("No register handler for [{path}]")]
    HandlerNotFound { path: String },

    /// Catch-all for unexpected internal errors.
    #[error("INTERNAL_ERROR")]
    Internal(#[from] anyhow::Error),
}

impl KvError {
    /// Return the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            KvError::MissingKeyParam
            | KvError::EmptyKey
            | KvError::MaximumKeyLengthReached
            | KvError::MissingValueParam
            | KvError::MaximumValueLengthReached => StatusCode::BAD_REQUEST,
            KvError::MissingRecord | KvError::HandlerNotFound { .. } => StatusCode::NOT_FOUND,
            KvError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for KvError {
    fn into_response(self) -> Response {
        if let KvError::Internal(ref err) = self {
            tracing::error!("Internal error: {err:#}");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status_code(), Json(body)).into_response()
    }
}
