//! Privileged connection to the server's control database.

use super::errors::{ProvisioningStep, TestDatabaseError, TestDbResult};
use super::worker_id::DatabaseName;
use crate::config::TestDatabaseConfig;
use crate::database::PgErrorCode;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Executor};
use tracing::{debug, warn};

/// Result of CREATE DATABASE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExisted,
}

/// Single connection used only for database-level DDL and backend termination
///
/// sqlx does not open implicit transactions, so every statement issued here
/// runs in autocommit mode, which CREATE/DROP DATABASE require.
#[derive(Debug)]
pub struct AdminConnection {
    conn: PgConnection,
}

impl AdminConnection {
    pub async fn connect(config: &TestDatabaseConfig) -> TestDbResult<Self> {
        let options = config.admin_options()?;
        let server = config.admin_url_redacted();

        let conn = tokio::time::timeout(config.connect_timeout, PgConnection::connect_with(&options))
            .await
            .map_err(|_| TestDatabaseError::ConnectTimeout {
                target: server.clone(),
                timeout: config.connect_timeout,
            })?
            .map_err(|e| {
                TestDatabaseError::provisioning(&server, ProvisioningStep::AdminConnect, e)
            })?;

        debug!(server = %server, "Admin connection established");
        Ok(Self { conn })
    }

    pub(crate) fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    pub async fn database_exists(&mut self, name: &DatabaseName) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(name.as_str())
            .fetch_one(&mut self.conn)
            .await
    }

    pub async fn drop_database_if_exists(&mut self, name: &DatabaseName) -> Result<(), sqlx::Error> {
        let statement = format!("DROP DATABASE IF EXISTS {}", name.quoted());
        self.conn.execute(statement.as_str()).await?;
        Ok(())
    }

    /// CREATE DATABASE, tolerating a concurrent creator of the same name
    pub async fn create_database(&mut self, name: &DatabaseName) -> Result<CreateOutcome, sqlx::Error> {
        let statement = format!("CREATE DATABASE {}", name.quoted());
        match self.conn.execute(statement.as_str()).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(e)
                if PgErrorCode::of(&e)
                    .as_deref()
                    .is_some_and(PgErrorCode::is_duplicate_database) =>
            {
                warn!(database = %name, "⚠️ Database already existed at CREATE time");
                Ok(CreateOutcome::AlreadyExisted)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn close(self) -> Result<(), sqlx::Error> {
        self.conn.close().await
    }
}
