//! Mapping of domain errors to HTTP responses

use crate::types::ErrorResponse;
use agent_inference::InferenceError;
use agent_storage::StorageError;
use agent_worker::BrokerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// An error rendered as `{"detail": ...}` with a status code
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("{} {}", self.status, self.detail);
        }
        (
            self.status,
            Json(ErrorResponse {
                detail: self.detail,
            }),
        )
            .into_response()
    }
}

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        let status = match &err {
            InferenceError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            InferenceError::UnknownModel(_) => StatusCode::NOT_FOUND,
            InferenceError::MemoryExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InferenceError::InvalidArtifact { .. } | InferenceError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("Blocking task failed: {err}"))
    }
}
