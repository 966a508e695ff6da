//! Error types for the compliance API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use compliance_engine::{ComplianceError, StoreError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Engine(#[from] ComplianceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(ComplianceError::DriverNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Engine(ComplianceError::Config(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Engine(ComplianceError::Storage(_)) | ApiError::Storage(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Engine(e @ ComplianceError::AllUnitsFailed { .. }) if e.is_retryable() => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retryable(&self) -> bool {
        match self {
            ApiError::Engine(e) => e.is_retryable(),
            ApiError::Storage(e) => e.is_retryable(),
            ApiError::Timeout(_) => true,
            ApiError::InvalidRequest(_) => false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "request failed: {}", self);
        }

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
            "retryable": self.retryable(),
        }));

        (status, body).into_response()
    }
}
