//! Worker database lifecycle against a live PostgreSQL server.

mod common;

use backend_api::database::schema::missing_tables;
use backend_api::database::PgErrorCode;
use backend_api::test_helpers::{
    TeardownOutcome, TestDatabaseError, TestSessionFactory, WorkerDatabaseState, WorkerId,
};
use sqlx::postgres::PgConnection;
use sqlx::Connection;
use std::time::Duration;

#[tokio::test]
async fn test_acquire_materializes_every_declared_table() {
    let Some(provisioner) = common::provisioner() else {
        return;
    };
    let schema = common::app_schema();

    let database = provisioner
        .acquire(&common::unique_worker("schema"), &schema)
        .await
        .expect("worker database provisioned");
    assert_eq!(database.state(), WorkerDatabaseState::Ready);

    let declared = &schema;
    let missing = database
        .session_factory()
        .scope(|session| async move {
            let mut conn = session.acquire().await.expect("session usable");
            missing_tables(&mut conn, declared).await.expect("catalog query")
        })
        .await
        .expect("session opened");
    assert!(missing.is_empty(), "missing tables: {missing:?}");

    let report = database.release().await;
    assert_eq!(report.outcome, TeardownOutcome::Dropped);
    assert!(report.is_clean(), "{report:?}");
}

#[tokio::test]
async fn test_acquire_replaces_leftover_database() {
    let Some(provisioner) = common::provisioner() else {
        return;
    };
    let worker = common::unique_worker("leftover");
    let schema = common::app_schema();

    // A previous run that crashed before release leaves its database behind
    let first = provisioner.acquire(&worker, &schema).await.unwrap();
    first
        .session_factory()
        .scope(|session| async move {
            let mut conn = session.acquire().await.unwrap();
            sqlx::query("INSERT INTO users (email) VALUES ('stale@example.com')")
                .execute(&mut *conn)
                .await
                .unwrap();
            drop(conn);
            session.commit().await.unwrap();
        })
        .await
        .unwrap();
    let url = first.url().to_string();
    std::mem::forget(first);

    let second = provisioner.acquire(&worker, &schema).await.unwrap();
    assert_eq!(second.url(), url);

    let count: i64 = second
        .session_factory()
        .scope(|session| async move {
            let mut conn = session.acquire().await.unwrap();
            sqlx::query_scalar("SELECT count(*) FROM users")
                .fetch_one(&mut *conn)
                .await
                .unwrap()
        })
        .await
        .unwrap();
    assert_eq!(count, 0);

    assert!(second.release().await.is_clean());
}

#[tokio::test]
async fn test_teardown_of_absent_database_succeeds() {
    let Some(provisioner) = common::provisioner() else {
        return;
    };

    let report = provisioner
        .teardown(&common::unique_worker("absent"))
        .await
        .expect("admin connection");
    assert_eq!(report.outcome, TeardownOutcome::AlreadyAbsent);
    assert!(report.is_clean(), "{report:?}");
}

#[tokio::test]
async fn test_release_terminates_lingering_connections() {
    let Some(provisioner) = common::provisioner() else {
        return;
    };
    let database = provisioner
        .acquire(&common::unique_worker("linger"), &common::app_schema())
        .await
        .unwrap();

    let lingering = database.session_factory().open().await.unwrap();

    let report = database.release().await;
    assert_eq!(report.outcome, TeardownOutcome::Dropped);
    let reap = report.reap.expect("reaper ran");
    assert!(reap.terminated >= 1);
    assert!(reap.settled());

    // The connection is dead; cleanup reports it instead of raising
    let cleanup = lingering.finish().await;
    assert!(!cleanup.rolled_back);
}

#[tokio::test]
async fn test_concurrent_workers_do_not_collide() {
    let Some(provisioner) = common::provisioner() else {
        return;
    };
    let schema = common::app_schema();
    let gw0 = common::unique_worker("gw0");
    let gw1 = common::unique_worker("gw1");

    let (first, second) = tokio::join!(
        provisioner.acquire(&gw0, &schema),
        provisioner.acquire(&gw1, &schema)
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_ne!(first.name(), second.name());

    let report = first.release().await;
    assert!(report.is_clean(), "{report:?}");

    // gw1's database is untouched by gw0's teardown
    let count: i64 = second
        .session_factory()
        .scope(|session| async move {
            let mut conn = session.acquire().await.unwrap();
            sqlx::query("INSERT INTO users (email) VALUES ('gw1@example.com')")
                .execute(&mut *conn)
                .await
                .unwrap();
            sqlx::query_scalar("SELECT count(*) FROM users")
                .fetch_one(&mut *conn)
                .await
                .unwrap()
        })
        .await
        .unwrap();
    assert_eq!(count, 1);

    assert!(second.release().await.is_clean());
}

#[tokio::test]
async fn test_scope_releases_after_panic() {
    let Some(provisioner) = common::provisioner() else {
        return;
    };
    let worker = common::unique_worker("panic");
    let name = provisioner.describe(&worker).unwrap().name;

    let outcome = tokio::spawn({
        let provisioner = provisioner.clone();
        let worker = worker.clone();
        async move {
            provisioner
                .scope(&worker, &common::app_schema(), |_info| async {
                    panic!("test body failed");
                })
                .await
        }
    })
    .await;
    assert!(outcome.unwrap_err().is_panic());

    let report = provisioner.teardown(&worker).await.unwrap();
    assert_eq!(
        report.outcome,
        TeardownOutcome::AlreadyAbsent,
        "{name} should have been dropped by the scope"
    );
}

/// Full worker lifecycle for a distributed-runner worker id
#[tokio::test]
async fn test_worker_gw7_end_to_end() {
    let Some(provisioner) = common::provisioner() else {
        return;
    };
    let schema = common::app_schema();

    let database = provisioner
        .acquire(&WorkerId::new("gw7"), &schema)
        .await
        .unwrap();
    assert!(database.url().ends_with("/test_db_gw7"));
    let url = database.url().to_string();
    let factory = database.session_factory();

    factory
        .scope(|session| async move {
            let mut conn = session.acquire().await.unwrap();
            sqlx::query("INSERT INTO users (email) VALUES ('first@example.com')")
                .execute(&mut *conn)
                .await
                .unwrap();
        })
        .await
        .unwrap();

    let count: i64 = factory
        .scope(|session| async move {
            let mut conn = session.acquire().await.unwrap();
            sqlx::query_scalar("SELECT count(*) FROM users")
                .fetch_one(&mut *conn)
                .await
                .unwrap()
        })
        .await
        .unwrap();
    assert_eq!(count, 0);

    let report = database.release().await;
    assert_eq!(report.outcome, TeardownOutcome::Dropped);

    let err = PgConnection::connect(&url)
        .await
        .expect_err("database is gone after release");
    assert!(PgErrorCode::of(&err)
        .as_deref()
        .is_some_and(PgErrorCode::is_invalid_catalog_name));

    // A factory built from the bare URL reports the database as gone
    let late = TestSessionFactory::from_url(&url, Duration::from_secs(5)).unwrap();
    assert!(matches!(
        late.open().await,
        Err(TestDatabaseError::DatabaseGone { .. })
    ));
}
