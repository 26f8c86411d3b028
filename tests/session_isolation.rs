//! Per-test transactional isolation inside one worker database.

mod common;

use backend_api::test_helpers::{TestSessionFactory, WorkerDatabase};
use sqlx::Connection;

async fn provision(prefix: &str) -> Option<WorkerDatabase> {
    let provisioner = common::provisioner()?;
    Some(
        provisioner
            .acquire(&common::unique_worker(prefix), &common::app_schema())
            .await
            .expect("worker database provisioned"),
    )
}

async fn user_count(factory: &TestSessionFactory) -> i64 {
    factory
        .scope(|session| async move {
            let mut conn = session.acquire().await.unwrap();
            let count: i64 = sqlx::query_scalar("SELECT count(*) FROM users")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
            count
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_uncommitted_rows_are_invisible_to_next_session() {
    let Some(database) = provision("isolation").await else {
        return;
    };
    let factory = database.session_factory();

    let test_a = factory.open().await.unwrap();
    assert!(test_a.session().in_transaction().await);
    {
        let mut conn = test_a.session().acquire().await.unwrap();
        sqlx::query("INSERT INTO users (email) VALUES ('a@example.com')")
            .execute(&mut *conn)
            .await
            .unwrap();
        let seen: i64 = sqlx::query_scalar("SELECT count(*) FROM users")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(seen, 1, "a test sees its own writes");
    }

    let cleanup = test_a.finish().await;
    assert!(cleanup.rolled_back);
    assert_eq!(cleanup.rollback_attempts, 1);
    assert!(cleanup.is_clean(), "{cleanup:?}");

    assert_eq!(user_count(&factory).await, 0);
    assert!(database.release().await.is_clean());
}

/// Code under test that manages its own transaction nests inside the test's
#[tokio::test]
async fn test_nested_commit_stays_inside_test_transaction() {
    let Some(database) = provision("nested").await else {
        return;
    };
    let factory = database.session_factory();

    factory
        .scope(|session| async move {
            assert_eq!(session.transaction_depth().await, 1);

            let mut conn = session.acquire().await.unwrap();
            let mut tx = conn.begin().await.unwrap();
            sqlx::query("INSERT INTO users (email) VALUES ('nested@example.com')")
                .execute(&mut *tx)
                .await
                .unwrap();
            tx.commit().await.unwrap();
            drop(conn);

            assert_eq!(session.transaction_depth().await, 1);
        })
        .await
        .unwrap();

    assert_eq!(user_count(&factory).await, 0);
    assert!(database.release().await.is_clean());
}

#[tokio::test]
async fn test_cleanup_unwinds_open_savepoints() {
    let Some(database) = provision("savepoints").await else {
        return;
    };
    let factory = database.session_factory();

    let test_session = factory.open().await.unwrap();
    let session = test_session.session().clone();
    session.begin().await.unwrap();
    {
        let mut conn = session.acquire().await.unwrap();
        sqlx::query("INSERT INTO users (email) VALUES ('savepoint@example.com')")
            .execute(&mut *conn)
            .await
            .unwrap();
    }
    assert_eq!(session.transaction_depth().await, 2);

    let cleanup = test_session.finish().await;
    assert!(cleanup.rolled_back);
    assert!(cleanup.is_clean(), "{cleanup:?}");

    assert_eq!(user_count(&factory).await, 0);
    assert!(database.release().await.is_clean());
}

#[tokio::test]
async fn test_sessions_never_share_connections() {
    let Some(database) = provision("distinct").await else {
        return;
    };
    let factory = database.session_factory();

    let first = factory.open().await.unwrap();
    let second = factory.open().await.unwrap();
    assert_ne!(first.id(), second.id());
    assert!(!first.session().same_session(second.session()));

    let pid = |session: backend_api::DbSession| async move {
        let mut conn = session.acquire().await.unwrap();
        let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        pid
    };
    assert_ne!(
        pid(first.session().clone()).await,
        pid(second.session().clone()).await
    );

    first.finish().await;
    second.finish().await;
    database.release().await;
}

#[tokio::test]
async fn test_scope_rolls_back_after_panic() {
    let Some(database) = provision("scope-panic").await else {
        return;
    };
    let factory = database.session_factory();

    let outcome = tokio::spawn({
        let factory = factory.clone();
        async move {
            factory
                .scope(|session| async move {
                    let mut conn = session.acquire().await.unwrap();
                    sqlx::query("INSERT INTO users (email) VALUES ('doomed@example.com')")
                        .execute(&mut *conn)
                        .await
                        .unwrap();
                    panic!("assertion inside test body");
                })
                .await
        }
    })
    .await;
    assert!(outcome.unwrap_err().is_panic());

    assert_eq!(user_count(&factory).await, 0);
    assert!(database.release().await.is_clean());
}

/// Committing inside a test forfeits isolation for the rest of the worker
#[tokio::test]
async fn test_explicit_commit_persists_across_sessions() {
    let Some(database) = provision("commit").await else {
        return;
    };
    let factory = database.session_factory();

    let cleanup = {
        let test_session = factory.open().await.unwrap();
        let session = test_session.session().clone();
        {
            let mut conn = session.acquire().await.unwrap();
            sqlx::query("INSERT INTO users (email) VALUES ('kept@example.com')")
                .execute(&mut *conn)
                .await
                .unwrap();
        }
        session.commit().await.unwrap();
        assert!(!session.in_transaction().await);
        test_session.finish().await
    };
    assert!(!cleanup.rolled_back);
    assert_eq!(cleanup.rollback_attempts, 0);
    assert!(cleanup.is_clean());

    assert_eq!(user_count(&factory).await, 1);
    database.release().await;
}

#[tokio::test]
async fn test_finished_session_is_closed() {
    let Some(database) = provision("closed").await else {
        return;
    };
    let factory = database.session_factory();

    let test_session = factory.open().await.unwrap();
    let handle = test_session.session().clone();
    test_session.finish().await;

    assert!(handle.is_closed().await);
    assert!(handle.acquire().await.is_err());
    database.release().await;
}
