//! # Custom Axum Extractors

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::database::DbSession;
use crate::web::errors::ApiError;
use crate::web::state::AppState;

/// Request-scoped database session, resolved through the dependency registry
///
/// Handlers never see which provider produced the session: in production it
/// is a pooled connection, under test it is the test's transaction.
#[async_trait]
impl FromRequestParts<AppState> for DbSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        state.session().await.map_err(ApiError::from)
    }
}
