//! # Worker Database Provisioning
//!
//! Each test-execution worker gets one physical database, created at worker
//! start and dropped at worker end:
//!
//! 1. Terminate stray connections, `DROP DATABASE IF EXISTS`, `CREATE DATABASE`
//!    (all through one autocommit admin connection)
//! 2. Materialize the schema over a fresh connection and verify every declared
//!    table is in the catalog
//! 3. Hand out the URL; tests open their own sessions against it
//! 4. At release, terminate connections again and drop the database
//!
//! Release never fails. Problems are logged with the worker id and database
//! name and returned in a [`TeardownReport`]; a leftover test database is
//! cleaned up by the next acquire for the same worker or by the server's own
//! lifecycle.

use super::admin::{AdminConnection, CreateOutcome};
use super::errors::{
    ProvisioningStep, TeardownError, TeardownStep, TestDatabaseError, TestDbResult,
};
use super::reaper::{ConnectionReaper, ReapReport};
use super::session::TestSessionFactory;
use super::worker_id::{DatabaseName, WorkerId};
use crate::config::TestDatabaseConfig;
use crate::database::schema::{self, SchemaDefinition};
use crate::database::PgErrorCode;
use futures::FutureExt;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle of a worker database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerDatabaseState {
    Uninitialized,
    Creating,
    Ready,
    TearingDown,
    Destroyed,
}

impl WorkerDatabaseState {
    pub fn can_transition_to(self, next: WorkerDatabaseState) -> bool {
        use WorkerDatabaseState::*;
        matches!(
            (self, next),
            (Uninitialized, Creating)
                | (Creating, Ready)
                | (Creating, TearingDown)
                | (Ready, TearingDown)
                | (TearingDown, Destroyed)
        )
    }
}

/// Everything a test needs to reach a worker database
#[derive(Debug, Clone)]
pub struct WorkerDatabaseInfo {
    pub worker_id: WorkerId,
    pub name: DatabaseName,
    pub url: String,
    pub options: PgConnectOptions,
    pub connect_timeout: Duration,
}

/// How teardown ended for the database itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    Dropped,
    AlreadyAbsent,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TeardownReport {
    pub worker_id: WorkerId,
    pub database: DatabaseName,
    pub outcome: TeardownOutcome,
    pub reap: Option<ReapReport>,
    pub errors: Vec<TeardownError>,
}

impl TeardownReport {
    /// Database is gone and every teardown step succeeded
    pub fn is_clean(&self) -> bool {
        self.outcome != TeardownOutcome::Failed && self.errors.is_empty()
    }
}

/// Creates worker databases against the server named by the admin URL
#[derive(Debug, Clone)]
pub struct WorkerDatabaseProvisioner {
    config: Arc<TestDatabaseConfig>,
    reaper: ConnectionReaper,
}

impl WorkerDatabaseProvisioner {
    pub fn new(config: Arc<TestDatabaseConfig>) -> Self {
        let reaper = ConnectionReaper::from_config(&config);
        Self { config, reaper }
    }

    /// Provisioner configured from `TEST_DATABASE_URL` and friends
    pub fn from_env() -> TestDbResult<Self> {
        Ok(Self::new(Arc::new(TestDatabaseConfig::from_env()?)))
    }

    pub fn config(&self) -> &TestDatabaseConfig {
        &self.config
    }

    /// Connection details for `worker_id` without touching the server
    pub fn describe(&self, worker_id: &WorkerId) -> TestDbResult<WorkerDatabaseInfo> {
        let name = DatabaseName::for_worker(worker_id)?;
        let url = self.config.database_url(name.as_str())?;
        let options = self.config.admin_options()?.database(name.as_str());

        Ok(WorkerDatabaseInfo {
            worker_id: worker_id.clone(),
            name,
            url,
            options,
            connect_timeout: self.config.connect_timeout,
        })
    }

    /// Create a fresh database for `worker_id` holding every table of `schema`
    ///
    /// The returned guard must be [`released`](WorkerDatabase::release). If
    /// provisioning fails part-way, whatever was created is torn down before
    /// the error is returned.
    pub async fn acquire(
        &self,
        worker_id: &WorkerId,
        schema: &dyn SchemaDefinition,
    ) -> TestDbResult<WorkerDatabase> {
        let info = self.describe(worker_id)?;
        info!(
            worker_id = %info.worker_id,
            database = %info.name,
            server = %self.config.admin_url_redacted(),
            "🧪 Provisioning worker database"
        );

        let admin = AdminConnection::connect(&self.config).await?;
        let mut database = WorkerDatabase {
            info,
            state: WorkerDatabaseState::Uninitialized,
            admin: Some(admin),
            reaper: self.reaper.clone(),
        };
        database.transition(WorkerDatabaseState::Creating);

        match database.create_and_materialize(schema).await {
            Ok(()) => {
                database.transition(WorkerDatabaseState::Ready);
                info!(
                    worker_id = %database.info.worker_id,
                    database = %database.info.name,
                    "✅ Worker database ready"
                );
                Ok(database)
            }
            Err(e) => {
                error!(
                    worker_id = %database.info.worker_id,
                    database = %database.info.name,
                    error = %e,
                    "❌ Worker database provisioning failed, tearing down"
                );
                database.teardown().await;
                Err(e)
            }
        }
    }

    /// Drop the database for `worker_id` if it exists
    ///
    /// For cleaning up after a crashed worker. Succeeds when there is nothing
    /// to drop.
    pub async fn teardown(&self, worker_id: &WorkerId) -> TestDbResult<TeardownReport> {
        let info = self.describe(worker_id)?;
        let admin = AdminConnection::connect(&self.config).await?;
        Ok(teardown_database(&info, Some(admin), &self.reaper).await)
    }

    /// Run `body` against a freshly provisioned database, releasing it on
    /// every exit path
    ///
    /// A panic inside `body` is re-raised after release has completed.
    pub async fn scope<F, Fut, T>(
        &self,
        worker_id: &WorkerId,
        schema: &dyn SchemaDefinition,
        body: F,
    ) -> TestDbResult<T>
    where
        F: FnOnce(WorkerDatabaseInfo) -> Fut,
        Fut: Future<Output = T>,
    {
        let database = self.acquire(worker_id, schema).await?;
        let info = database.info().clone();

        let outcome = AssertUnwindSafe(async move { body(info).await })
            .catch_unwind()
            .await;
        database.release().await;

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// A provisioned worker database and the admin connection that will drop it
///
/// Dropping the guard without calling [`release`](Self::release) spawns the
/// teardown on the current tokio runtime and logs a warning; the spawned task
/// may not finish if the runtime is shutting down.
#[derive(Debug)]
pub struct WorkerDatabase {
    info: WorkerDatabaseInfo,
    state: WorkerDatabaseState,
    admin: Option<AdminConnection>,
    reaper: ConnectionReaper,
}

impl WorkerDatabase {
    pub fn info(&self) -> &WorkerDatabaseInfo {
        &self.info
    }

    pub fn url(&self) -> &str {
        &self.info.url
    }

    pub fn name(&self) -> &DatabaseName {
        &self.info.name
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.info.worker_id
    }

    pub fn state(&self) -> WorkerDatabaseState {
        self.state
    }

    /// Factory for per-test sessions against this database
    pub fn session_factory(&self) -> TestSessionFactory {
        TestSessionFactory::new(&self.info)
    }

    /// Terminate remaining connections and drop the database
    pub async fn release(mut self) -> TeardownReport {
        self.teardown().await
    }

    fn transition(&mut self, next: WorkerDatabaseState) {
        if self.state.can_transition_to(next) {
            debug!(
                database = %self.info.name,
                from = ?self.state,
                to = ?next,
                "Worker database state transition"
            );
            self.state = next;
        } else {
            warn!(
                database = %self.info.name,
                from = ?self.state,
                to = ?next,
                "Ignoring invalid worker database state transition"
            );
        }
    }

    async fn create_and_materialize(&mut self, schema: &dyn SchemaDefinition) -> TestDbResult<()> {
        let name = &self.info.name;
        let admin = self.admin.as_mut().ok_or_else(|| {
            TestDatabaseError::provisioning(
                name,
                ProvisioningStep::AdminConnect,
                sqlx::Error::PoolClosed,
            )
        })?;

        self.reaper
            .terminate(admin, name)
            .await
            .map_err(|e| TestDatabaseError::provisioning(name, ProvisioningStep::Reap, e))?;

        info!(database = %name, "Dropping database if it exists");
        admin
            .drop_database_if_exists(name)
            .await
            .map_err(|e| TestDatabaseError::provisioning(name, ProvisioningStep::Drop, e))?;

        info!(database = %name, "Creating database");
        let created = admin
            .create_database(name)
            .await
            .map_err(|e| TestDatabaseError::provisioning(name, ProvisioningStep::Create, e))?;
        if created == CreateOutcome::AlreadyExisted {
            warn!(database = %name, "⚠️ Reusing database created concurrently by another process");
        }

        let mut conn = tokio::time::timeout(
            self.info.connect_timeout,
            PgConnection::connect_with(&self.info.options),
        )
        .await
        .map_err(|_| TestDatabaseError::ConnectTimeout {
            target: name.to_string(),
            timeout: self.info.connect_timeout,
        })?
        .map_err(|e| TestDatabaseError::provisioning(name, ProvisioningStep::Connect, e))?;

        info!(
            database = %name,
            tables = schema.table_names().len(),
            "Creating all tables"
        );
        let result = materialize_and_verify(&mut conn, name, schema).await;

        if let Err(e) = conn.close().await {
            warn!(database = %name, error = %e, "⚠️ Failed to close schema connection cleanly");
        }
        result
    }

    async fn teardown(&mut self) -> TeardownReport {
        self.transition(WorkerDatabaseState::TearingDown);
        let report = teardown_database(&self.info, self.admin.take(), &self.reaper).await;
        self.transition(WorkerDatabaseState::Destroyed);
        report
    }
}

impl Drop for WorkerDatabase {
    fn drop(&mut self) {
        let Some(admin) = self.admin.take() else {
            return;
        };

        warn!(
            worker_id = %self.info.worker_id,
            database = %self.info.name,
            "⚠️ Worker database dropped without release, scheduling teardown"
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let info = self.info.clone();
                let reaper = self.reaper.clone();
                handle.spawn(async move {
                    teardown_database(&info, Some(admin), &reaper).await;
                });
            }
            Err(_) => {
                error!(
                    worker_id = %self.info.worker_id,
                    database = %self.info.name,
                    "❌ No async runtime available; worker database left behind"
                );
            }
        }
    }
}

async fn materialize_and_verify(
    conn: &mut PgConnection,
    name: &DatabaseName,
    schema: &dyn SchemaDefinition,
) -> TestDbResult<()> {
    schema::materialize(conn, schema)
        .await
        .map_err(|e| TestDatabaseError::provisioning(name, ProvisioningStep::Materialize, e))?;

    let missing = schema::missing_tables(conn, schema)
        .await
        .map_err(|e| TestDatabaseError::provisioning(name, ProvisioningStep::Verify, e))?;
    if !missing.is_empty() {
        return Err(TestDatabaseError::SchemaIncomplete {
            database: name.to_string(),
            missing,
        });
    }
    Ok(())
}

async fn teardown_database(
    info: &WorkerDatabaseInfo,
    admin: Option<AdminConnection>,
    reaper: &ConnectionReaper,
) -> TeardownReport {
    info!(
        worker_id = %info.worker_id,
        database = %info.name,
        "🧹 Cleaning up worker database"
    );

    let mut report = TeardownReport {
        worker_id: info.worker_id.clone(),
        database: info.name.clone(),
        outcome: TeardownOutcome::Failed,
        reap: None,
        errors: Vec::new(),
    };
    let failure = |step: TeardownStep, reason: String, code: Option<String>| TeardownError {
        worker_id: info.worker_id.to_string(),
        database: info.name.to_string(),
        step,
        reason,
        code,
    };

    let Some(mut admin) = admin else {
        report.errors.push(failure(
            TeardownStep::AdminUnavailable,
            "admin connection was already consumed".to_string(),
            None,
        ));
        log_teardown(&report);
        return report;
    };

    match reaper.terminate(&mut admin, &info.name).await {
        Ok(reap) => report.reap = Some(reap),
        Err(e) => report
            .errors
            .push(failure(TeardownStep::Reap, e.to_string(), PgErrorCode::of(&e))),
    }

    let exists = match admin.database_exists(&info.name).await {
        Ok(exists) => exists,
        Err(e) => {
            report.errors.push(failure(
                TeardownStep::ExistenceCheck,
                e.to_string(),
                PgErrorCode::of(&e),
            ));
            // Unknown; attempt the drop anyway
            true
        }
    };

    if exists {
        match admin.drop_database_if_exists(&info.name).await {
            Ok(()) => report.outcome = TeardownOutcome::Dropped,
            Err(e) => {
                let code = PgErrorCode::of(&e);
                let reason = if code.as_deref().is_some_and(PgErrorCode::is_object_in_use) {
                    format!("{e} (connections reappeared after termination)")
                } else {
                    e.to_string()
                };
                report.errors.push(failure(TeardownStep::Drop, reason, code));
            }
        }
    } else {
        report.outcome = TeardownOutcome::AlreadyAbsent;
    }

    if let Err(e) = admin.close().await {
        report
            .errors
            .push(failure(TeardownStep::AdminClose, e.to_string(), PgErrorCode::of(&e)));
    }

    log_teardown(&report);
    report
}

fn log_teardown(report: &TeardownReport) {
    for failure in &report.errors {
        error!(
            worker_id = %failure.worker_id,
            database = %failure.database,
            step = %failure.step,
            code = failure.code.as_deref(),
            reason = %failure.reason,
            "❌ Error during database cleanup; the database might still exist"
        );
    }

    match report.outcome {
        TeardownOutcome::Dropped => info!(
            worker_id = %report.worker_id,
            database = %report.database,
            "✅ Worker database dropped"
        ),
        TeardownOutcome::AlreadyAbsent => info!(
            worker_id = %report.worker_id,
            database = %report.database,
            "Worker database already absent"
        ),
        TeardownOutcome::Failed => warn!(
            worker_id = %report.worker_id,
            database = %report.database,
            "⚠️ Worker database may have been left behind"
        ),
    }
}
