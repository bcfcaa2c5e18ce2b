//! Error taxonomy for list, chat and check-in operations.
//!
//! Not-found and not-owned collapse into one variant so the API never
//! reveals whether another user's entity exists.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum TodoError {
    #[error("invalid input for '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("{0} not found or access denied")]
    NotFound(String),

    #[error("merge failed: {0}")]
    Merge(String),

    #[error("text generation failed: {0:#}")]
    Generation(anyhow::Error),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl TodoError {
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "INVALID_INPUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Merge(_) => "MERGE_FAILED",
            Self::Generation(_) => "GENERATION_FAILED",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Generation(_) => StatusCode::BAD_GATEWAY,
            Self::Merge(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a client. Server-side failures stay generic.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation { .. } | Self::NotFound(_) => self.to_string(),
            Self::Merge(_) => "Failed to update todo list".to_string(),
            Self::Generation(_) => "Failed to process chat message".to_string(),
            Self::Storage(_) => "Internal storage error".to_string(),
        }
    }
}

impl From<rusqlite::Error> for TodoError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.into())
    }
}

impl From<anyhow::Error> for TodoError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl IntoResponse for TodoError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{} ({})", self, self.code());
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}
