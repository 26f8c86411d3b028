//! # Web API Route Definitions

use crate::web::handlers;
use crate::web::state::AppState;
use axum::routing::get;
use axum::Router;

/// Health routes; public and unversioned
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(handlers::health::health_check))
        .route("/healthz/ready", get(handlers::health::readiness_check))
}
