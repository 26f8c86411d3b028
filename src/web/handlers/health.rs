//! # Health Check Handlers

use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::database::DbSession;
use crate::web::errors::{ApiError, ApiResult};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ReadinessResponse {
    pub status: String,
    pub database: String,
}

/// Basic health check endpoint: GET /healthz
///
/// Returns OK whenever the process is serving requests; touches nothing else.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Readiness probe: GET /healthz/ready
///
/// Resolves a database session the same way any data-touching handler would
/// and runs a trivial query through it.
pub async fn readiness_check(session: DbSession) -> ApiResult<Json<ReadinessResponse>> {
    debug!(session = %session.label(), "Performing readiness probe");

    let mut conn = session.acquire().await.map_err(|e| {
        error!(error = %e, "Readiness probe could not use session");
        ApiError::ServiceUnavailable
    })?;

    let value: i32 = sqlx::query_scalar("SELECT 1")
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            error!(error = %e, "Readiness probe query failed");
            ApiError::ServiceUnavailable
        })?;

    if value != 1 {
        return Err(ApiError::DatabaseError {
            operation: "readiness query returned an unexpected value".to_string(),
        });
    }

    Ok(Json(ReadinessResponse {
        status: "ready".to_string(),
        database: "ok".to_string(),
    }))
}
