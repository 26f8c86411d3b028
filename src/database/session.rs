//! # Database Sessions
//!
//! [`DbSession`] is the handle request handlers and tests talk to the database
//! through. It is cheap to clone; every clone refers to the same underlying
//! connection, so a test can hand its session to the web layer and observe the
//! same transaction the handlers write into.
//!
//! A session wraps either a connection checked out of the production pool or a
//! dedicated connection owned by a test. Transaction state is tracked on the
//! session itself so cleanup code can decide whether a rollback is pending.

use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgTransactionManager};
use sqlx::{Connection, Postgres, TransactionManager};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session {0} is closed")]
    Closed(String),
    #[error("Database error in session {label}: {source}")]
    Database {
        label: String,
        #[source]
        source: sqlx::Error,
    },
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// The connection behind a session
pub enum SessionConnection {
    Pooled(PoolConnection<Postgres>),
    Dedicated(PgConnection),
}

impl fmt::Debug for SessionConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionConnection::Pooled(_) => f.write_str("Pooled"),
            SessionConnection::Dedicated(_) => f.write_str("Dedicated"),
        }
    }
}

impl Deref for SessionConnection {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self {
            SessionConnection::Pooled(conn) => conn,
            SessionConnection::Dedicated(conn) => conn,
        }
    }
}

impl DerefMut for SessionConnection {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self {
            SessionConnection::Pooled(conn) => conn,
            SessionConnection::Dedicated(conn) => conn,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    connection: Option<SessionConnection>,
}

/// Shared handle to one database connection
#[derive(Debug, Clone)]
pub struct DbSession {
    label: Arc<str>,
    state: Arc<Mutex<SessionState>>,
}

/// Exclusive access to a session's connection
///
/// Derefs to [`PgConnection`], so `&mut *guard` is an sqlx executor.
pub struct SessionGuard<'a> {
    inner: MappedMutexGuard<'a, SessionConnection>,
}

impl Deref for SessionGuard<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        &self.inner
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut PgConnection {
        &mut self.inner
    }
}

impl DbSession {
    fn with_connection(label: impl Into<Arc<str>>, connection: SessionConnection) -> Self {
        Self {
            label: label.into(),
            state: Arc::new(Mutex::new(SessionState {
                connection: Some(connection),
            })),
        }
    }

    /// Session over a connection checked out of a pool
    pub fn pooled(label: impl Into<Arc<str>>, connection: PoolConnection<Postgres>) -> Self {
        Self::with_connection(label, SessionConnection::Pooled(connection))
    }

    /// Session owning its own connection
    pub fn dedicated(label: impl Into<Arc<str>>, connection: PgConnection) -> Self {
        Self::with_connection(label, SessionConnection::Dedicated(connection))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether two handles refer to the same session
    pub fn same_session(&self, other: &DbSession) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Lock the session's connection for a sequence of statements
    pub async fn acquire(&self) -> SessionResult<SessionGuard<'_>> {
        let guard = self.state.lock().await;
        MutexGuard::try_map(guard, |state| state.connection.as_mut())
            .map(|inner| SessionGuard { inner })
            .map_err(|_| SessionError::Closed(self.label.to_string()))
    }

    /// Open transaction levels: 0 outside a transaction, 2+ inside savepoints
    pub async fn transaction_depth(&self) -> usize {
        let state = self.state.lock().await;
        state
            .connection
            .as_deref()
            .map_or(0, PgTransactionManager::get_transaction_depth)
    }

    pub async fn in_transaction(&self) -> bool {
        self.transaction_depth().await > 0
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.connection.is_none()
    }

    /// Start a transaction, or a savepoint if one is already open
    ///
    /// Goes through sqlx's transaction manager, so `Connection::begin` called
    /// later on this session's connection nests as a savepoint instead of
    /// issuing a second `BEGIN`.
    pub async fn begin(&self) -> SessionResult<()> {
        let mut conn = self.acquire().await?;
        PgTransactionManager::begin(&mut conn, None)
            .await
            .map_err(|source| self.database_error(source))?;

        let depth = PgTransactionManager::get_transaction_depth(&conn);
        debug!(session = %self.label, depth, "Transaction opened");
        Ok(())
    }

    /// Commit the innermost open transaction level
    ///
    /// At the outermost level inside a test this persists the changes past
    /// the test's rollback boundary; later tests in the same worker will see
    /// them.
    pub async fn commit(&self) -> SessionResult<()> {
        let mut conn = self.acquire().await?;
        if PgTransactionManager::get_transaction_depth(&conn) == 1 {
            warn!(
                session = %self.label,
                "⚠️ Explicit COMMIT on session: changes will outlive this session's rollback boundary"
            );
        }
        PgTransactionManager::commit(&mut conn)
            .await
            .map_err(|source| self.database_error(source))
    }

    /// Roll back the innermost open transaction level, if any
    pub async fn rollback(&self) -> SessionResult<()> {
        let mut conn = self.acquire().await?;
        if PgTransactionManager::get_transaction_depth(&conn) == 0 {
            debug!(session = %self.label, "No open transaction to roll back");
            return Ok(());
        }
        PgTransactionManager::rollback(&mut conn)
            .await
            .map_err(|source| self.database_error(source))
    }

    /// Roll back every open level, savepoints included
    pub async fn rollback_all(&self) -> SessionResult<()> {
        let mut conn = self.acquire().await?;
        while PgTransactionManager::get_transaction_depth(&conn) > 0 {
            PgTransactionManager::rollback(&mut conn)
                .await
                .map_err(|source| self.database_error(source))?;
        }
        Ok(())
    }

    fn database_error(&self, source: sqlx::Error) -> SessionError {
        SessionError::Database {
            label: self.label.to_string(),
            source,
        }
    }

    /// Release the connection
    ///
    /// Pooled connections return to their pool; dedicated connections are
    /// closed gracefully. Closing an already-closed session is a no-op.
    pub async fn close(&self) -> SessionResult<()> {
        let connection = self.state.lock().await.connection.take();
        let in_transaction = connection
            .as_deref()
            .is_some_and(|conn| PgTransactionManager::get_transaction_depth(conn) > 0);

        let result = match connection {
            Some(SessionConnection::Dedicated(conn)) => conn.close().await,
            // A pooled connection with an open transaction must not be reused
            Some(SessionConnection::Pooled(conn)) if in_transaction => conn.close().await,
            Some(SessionConnection::Pooled(conn)) => {
                drop(conn);
                Ok(())
            }
            None => Ok(()),
        };

        result.map_err(|source| self.database_error(source))
    }
}
