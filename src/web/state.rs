//! # Web Application State
//!
//! Shared state handed to every handler: settings and the live dependency
//! registry through which request-scoped database sessions are resolved.

use crate::config::Settings;
use crate::database::{DatabaseConnection, DbSession};
use crate::dependencies::{DependencyKey, DependencyRegistry, SessionProvider};
use crate::error::BackendError;
use futures::FutureExt;
use std::sync::Arc;
use tracing::debug;

pub type AppDependencies = DependencyRegistry<DependencyKey, SessionProvider>;

#[derive(Clone, Debug)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub dependencies: AppDependencies,
}

impl AppState {
    /// State with the production pool registered as the session provider
    pub fn new(settings: Arc<Settings>, database: DatabaseConnection) -> Self {
        let state = Self::without_database(settings);
        state
            .dependencies
            .register(DependencyKey::DatabaseSession, pool_session_provider(database));
        state
    }

    /// State with no session provider registered
    ///
    /// Requests that need a session fail until one is registered or overridden.
    pub fn without_database(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            dependencies: DependencyRegistry::new(),
        }
    }

    /// Resolve and invoke the current database-session provider
    pub async fn session(&self) -> Result<DbSession, BackendError> {
        let provider = self
            .dependencies
            .resolve(&DependencyKey::DatabaseSession)
            .ok_or_else(|| {
                BackendError::DependencyNotRegistered(DependencyKey::DatabaseSession.to_string())
            })?;

        let session = provider().await?;
        debug!(session = %session.label(), "Resolved database session for request");
        Ok(session)
    }
}

/// Provider checking a fresh connection out of `database` for each request
pub fn pool_session_provider(database: DatabaseConnection) -> SessionProvider {
    Arc::new(move || {
        let database = database.clone();
        async move { database.session().await }.boxed()
    })
}
