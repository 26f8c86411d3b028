//! Routing the application's database dependency to a test's session.

use super::errors::TestDbResult;
use super::session::{SessionCleanup, TestSessionFactory};
use crate::database::DbSession;
use crate::dependencies::{DependencyKey, OverrideGuard, OverrideState, SessionProvider};
use crate::web::create_app;
use crate::web::state::{AppDependencies, AppState};
use axum::Router;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::debug;

/// Make every request resolve `session` until the guard is dropped
///
/// Handlers then read and write inside the test's transaction, so their
/// effects are visible to the test and vanish with its rollback.
pub fn bind_test_session(
    dependencies: &AppDependencies,
    session: &DbSession,
) -> OverrideGuard<DependencyKey, SessionProvider> {
    debug!(session = %session.label(), "Binding test session as database provider");
    dependencies.override_with(DependencyKey::DatabaseSession, session_provider(session.clone()))
}

fn session_provider(session: DbSession) -> SessionProvider {
    Arc::new(move || {
        let session = session.clone();
        async move { Ok(session) }.boxed()
    })
}

/// Outcome of [`run_with_test_app`]
#[derive(Debug)]
pub struct TestAppRun<T> {
    pub value: T,
    pub cleanup: SessionCleanup,
    /// Registry state observed once the session was rolled back and closed
    pub overrides_at_cleanup: OverrideState,
}

/// Run `body` against the app with its database bound to a fresh test session
///
/// The session is rolled back and closed first, then the override is lifted,
/// on every exit path. A panic inside `body` is re-raised afterwards.
pub async fn run_with_test_app<F, Fut, T>(
    factory: &TestSessionFactory,
    state: &AppState,
    body: F,
) -> TestDbResult<TestAppRun<T>>
where
    F: FnOnce(Router, DbSession) -> Fut,
    Fut: Future<Output = T>,
{
    let test_session = factory.open().await?;
    let session = test_session.session().clone();
    let guard = bind_test_session(&state.dependencies, &session);
    let app = create_app(state.clone());

    let outcome = AssertUnwindSafe(async move { body(app, session).await })
        .catch_unwind()
        .await;

    let cleanup = test_session.finish().await;
    let overrides_at_cleanup = state.dependencies.state();
    guard.restore();

    match outcome {
        Ok(value) => Ok(TestAppRun {
            value,
            cleanup,
            overrides_at_cleanup,
        }),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
