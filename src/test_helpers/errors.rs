//! Error types for test database provisioning and test sessions.
//!
//! Only [`TestDatabaseError`] is ever returned as an `Err`. Teardown and
//! post-test cleanup failures are collected as [`TeardownError`] and
//! [`TransactionError`] values inside their reports and logged, because by the
//! time they happen the outcome of the tests is already decided.

use crate::config::ConfigurationError;
use crate::database::SessionError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Step of worker database provisioning that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStep {
    AdminConnect,
    Reap,
    Drop,
    Create,
    Connect,
    Materialize,
    Verify,
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            ProvisioningStep::AdminConnect => "admin connect",
            ProvisioningStep::Reap => "connection termination",
            ProvisioningStep::Drop => "DROP DATABASE",
            ProvisioningStep::Create => "CREATE DATABASE",
            ProvisioningStep::Connect => "worker database connect",
            ProvisioningStep::Materialize => "schema materialization",
            ProvisioningStep::Verify => "schema verification",
        };
        f.write_str(step)
    }
}

#[derive(Debug, Error)]
pub enum TestDatabaseError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Provisioning of {database} failed during {step}: {source}")]
    Provisioning {
        database: String,
        step: ProvisioningStep,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database {database} is missing declared tables after materialization: {missing:?}")]
    SchemaIncomplete {
        database: String,
        missing: Vec<String>,
    },

    #[error("Timed out after {timeout:?} connecting to {target}")]
    ConnectTimeout { target: String, timeout: Duration },

    #[error("Database {database} does not exist; its worker may already have torn it down")]
    DatabaseGone { database: String },

    #[error("Failed to open test session on {database}: {source}")]
    SessionOpen {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl TestDatabaseError {
    pub(crate) fn provisioning(
        database: impl fmt::Display,
        step: ProvisioningStep,
        source: sqlx::Error,
    ) -> Self {
        TestDatabaseError::Provisioning {
            database: database.to_string(),
            step,
            source,
        }
    }
}

pub type TestDbResult<T> = std::result::Result<T, TestDatabaseError>;

/// Step of worker database teardown that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    AdminUnavailable,
    Reap,
    ExistenceCheck,
    Drop,
    AdminClose,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            TeardownStep::AdminUnavailable => "admin connection unavailable",
            TeardownStep::Reap => "connection termination",
            TeardownStep::ExistenceCheck => "existence check",
            TeardownStep::Drop => "DROP DATABASE",
            TeardownStep::AdminClose => "admin connection close",
        };
        f.write_str(step)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Teardown of {database} (worker {worker_id}) failed during {step}: {reason}")]
pub struct TeardownError {
    pub worker_id: String,
    pub database: String,
    pub step: TeardownStep,
    pub reason: String,
    /// SQLSTATE of the underlying server error, when there was one
    pub code: Option<String>,
}

/// Step of test session cleanup that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStep {
    Rollback { attempt: u8 },
    Close,
}

impl fmt::Display for TransactionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStep::Rollback { attempt } => write!(f, "rollback attempt {attempt}"),
            TransactionStep::Close => f.write_str("close"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Session {session} on {database} failed during {step}: {reason}")]
pub struct TransactionError {
    pub session: String,
    pub database: String,
    pub step: TransactionStep,
    pub reason: String,
}
