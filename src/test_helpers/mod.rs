//! # Test Database Harness
//!
//! Per-worker database provisioning and per-test transactional isolation for
//! tests that run against a real PostgreSQL server.
//!
//! ## Layout
//!
//! - [`worker_id`] - Worker identity and database naming
//! - [`admin`] - Autocommit admin connection for CREATE/DROP DATABASE
//! - [`reaper`] - Termination of connections to a database about to be dropped
//! - [`provisioner`] - Worker database lifecycle (acquire, release, scope)
//! - [`session`] - Per-test sessions rolled back at test end
//! - [`overrides`] - Binding a test session into the application's dependencies
//! - [`errors`] - Error and report types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use backend_api::database::SqlSchema;
//! use backend_api::test_helpers::{WorkerDatabaseProvisioner, WorkerId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = SqlSchema::new().table(
//!     "items",
//!     "CREATE TABLE items (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL)",
//! );
//!
//! let provisioner = WorkerDatabaseProvisioner::from_env()?;
//! let database = provisioner.acquire(&WorkerId::from_env(), &schema).await?;
//!
//! let factory = database.session_factory();
//! factory
//!     .scope(|session| async move {
//!         let mut conn = session.acquire().await.unwrap();
//!         sqlx::query("INSERT INTO items (name) VALUES ('scratch')")
//!             .execute(&mut *conn)
//!             .await
//!             .unwrap();
//!     })
//!     .await?;
//!
//! let report = database.release().await;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod errors;
pub mod overrides;
pub mod provisioner;
pub mod reaper;
pub mod session;
pub mod worker_id;

pub use admin::{AdminConnection, CreateOutcome};
pub use errors::{
    ProvisioningStep, TeardownError, TeardownStep, TestDatabaseError, TestDbResult,
    TransactionError, TransactionStep,
};
pub use overrides::{bind_test_session, run_with_test_app, TestAppRun};
pub use provisioner::{
    TeardownOutcome, TeardownReport, WorkerDatabase, WorkerDatabaseInfo,
    WorkerDatabaseProvisioner, WorkerDatabaseState,
};
pub use reaper::{ConnectionReaper, ReapReport};
pub use session::{SessionCleanup, TestSession, TestSessionFactory};
pub use worker_id::{sanitize_worker_id, DatabaseName, WorkerId, PRIMARY_WORKER_ID};
