//! Shared setup for database-backed integration tests.
#![allow(dead_code)]

use backend_api::config::test_database::ADMIN_URL_VAR;
use backend_api::config::TestDatabaseConfig;
use backend_api::database::SqlSchema;
use backend_api::logging::init_structured_logging;
use backend_api::test_helpers::{WorkerDatabaseProvisioner, WorkerId};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Provisioner for the configured server, or `None` when no server is configured
///
/// `.env` is loaded first, so a local `TEST_DATABASE_URL` there is enough.
/// Tests return early on `None` so the suite passes on machines without
/// PostgreSQL; each skip is printed so it shows up in `cargo test` output.
pub fn provisioner() -> Option<WorkerDatabaseProvisioner> {
    init_structured_logging();
    dotenvy::dotenv().ok();

    match std::env::var(ADMIN_URL_VAR) {
        Ok(url) if !url.trim().is_empty() => {
            let config = TestDatabaseConfig::from_env().expect("valid test database configuration");
            Some(WorkerDatabaseProvisioner::new(Arc::new(config)))
        }
        _ => {
            let test = std::thread::current()
                .name()
                .unwrap_or("unnamed")
                .to_string();
            info!(test = %test, "{ADMIN_URL_VAR} not set, skipping database-backed test");
            eprintln!("SKIPPED {test}: {ADMIN_URL_VAR} not set");
            None
        }
    }
}

/// Worker id that will not collide with concurrently running test binaries
pub fn unique_worker(prefix: &str) -> WorkerId {
    let suffix = Uuid::new_v4().simple().to_string();
    WorkerId::new(format!("{prefix}-{}", &suffix[..8]))
}

/// Two-table schema the integration tests write into
pub fn app_schema() -> SqlSchema {
    SqlSchema::new()
        .table(
            "users",
            "CREATE TABLE users (
                id BIGSERIAL PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .table(
            "notes",
            "CREATE TABLE notes (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES users (id),
                body TEXT NOT NULL
            )",
        )
}

pub const APP_TABLES: [&str; 2] = ["users", "notes"];
