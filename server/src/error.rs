use std::sync::Arc;

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tts_core::TtsError;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl From<TtsError> for ApiError {
    fn from(e: TtsError) -> Self {
        match e {
            TtsError::Validation(msg) => ApiError::InvalidInput(msg),
            TtsError::NotFound(msg) => ApiError::NotFound(msg),
            TtsError::Generation(e) => ApiError::Generation(format!("{e:#}")),
            TtsError::Io(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

/// Errors shared by every waiter of a cached computation.
impl From<Arc<TtsError>> for ApiError {
    fn from(e: Arc<TtsError>) -> Self {
        match e.as_ref() {
            TtsError::Validation(msg) => ApiError::InvalidInput(msg.clone()),
            TtsError::NotFound(msg) => ApiError::NotFound(msg.clone()),
            TtsError::Generation(e) => ApiError::Generation(format!("{e:#}")),
            TtsError::Io(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::InvalidInput(format!("Malformed multipart body: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Generation(msg) => {
                tracing::error!("Generation error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
