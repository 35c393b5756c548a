// src/error.rs
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::PollStatus;
use crate::store::StoreError;

/// Coarse classification surfaced to clients alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    State,
    Internal,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("poll {0} not found")]
    PollNotFound(Uuid),

    #[error("{0} not found")]
    NotFound(String),

    #[error("another poll is active ({0})")]
    AnotherPollActive(Uuid),

    #[error("poll {0} is not active")]
    PollNotActive(Uuid),

    #[error("option {option_id} does not belong to poll {poll_id}")]
    InvalidOption { poll_id: Uuid, option_id: Uuid },

    #[error("student {student_id} has already voted in poll {poll_id}")]
    DuplicateVote { poll_id: Uuid, student_id: String },

    #[error("poll {poll_id} cannot be started from {status}")]
    InvalidTransition { poll_id: Uuid, status: PollStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::PollNotFound(_) | AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::AnotherPollActive(_) => ErrorKind::Conflict,
            AppError::PollNotActive(_)
            | AppError::InvalidOption { .. }
            | AppError::DuplicateVote { .. }
            | AppError::InvalidTransition { .. } => ErrorKind::State,
            AppError::Store(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::State => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.kind() == ErrorKind::Internal {
            tracing::error!(error = %self, "command failed");
        }
        let body = Json(json!({ "error": self.to_string(), "kind": self.kind() }));
        (self.status_code(), body).into_response()
    }
}
