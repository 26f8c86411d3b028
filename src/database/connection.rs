use crate::config::Settings;
use crate::database::session::DbSession;
use crate::error::{BackendError, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::str::FromStr;
use std::time::Duration;

/// Production connection pool
///
/// Connections are pinged before being handed out so that server restarts are
/// survived without surfacing stale-socket errors to requests.
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    /// Build a lazily-connecting pool from settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut options = PgConnectOptions::from_str(&settings.database_url)
            .map_err(|e| BackendError::ConfigurationError(format!("Invalid DATABASE_URL: {e}")))?;

        // sqlx logs every statement at debug level by default; keep that for dev only
        if !settings.is_development() {
            options = options.disable_statement_logging();
        }

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .test_before_acquire(true)
            .connect_lazy_with(options);

        Ok(Self { pool })
    }

    /// Check a connection out of the pool as a request-scoped session
    pub async fn session(&self) -> Result<DbSession> {
        let conn = self.pool.acquire().await?;
        Ok(DbSession::pooled("request", conn))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
