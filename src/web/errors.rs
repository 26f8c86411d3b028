//! Web-facing error type and its HTTP mapping.

use crate::error::BackendError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Service temporarily unavailable")]
    ServiceUnavailable,

    #[error("Database error: {operation}")]
    DatabaseError { operation: String },

    #[error("Internal server error")]
    Internal,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::DatabaseError(reason) | BackendError::SessionError(reason) => {
                error!(reason = %reason, "Database failure while serving request");
                ApiError::ServiceUnavailable
            }
            BackendError::DependencyNotRegistered(key) => {
                error!(key = %key, "Request needed a dependency with no provider");
                ApiError::Internal
            }
            other => {
                error!(error = %other, "Unhandled backend error");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_code, message) = match &self {
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "Service temporarily unavailable".to_string(),
            ),
            ApiError::DatabaseError { operation } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                operation.clone(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error".to_string(),
            ),
        };

        let body = json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        (status_code, Json(body)).into_response()
    }
}
