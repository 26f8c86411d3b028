//! Termination of backends connected to a database that is about to be dropped.

use super::admin::AdminConnection;
use super::worker_id::DatabaseName;
use crate::config::TestDatabaseConfig;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const TERMINATE_SQL: &str = "SELECT count(*) FILTER (WHERE pg_terminate_backend(pid)) \
     FROM pg_stat_activity \
     WHERE datname = $1 AND pid <> pg_backend_pid()";

const REMAINING_SQL: &str = "SELECT count(*) FROM pg_stat_activity \
     WHERE datname = $1 AND pid <> pg_backend_pid()";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    /// Backends that accepted the termination signal
    pub terminated: i64,
    /// Backends still listed when polling stopped
    pub remaining: i64,
    pub waited: Duration,
}

impl ReapReport {
    pub fn settled(&self) -> bool {
        self.remaining == 0
    }
}

/// Severs every connection to a target database except the caller's own
///
/// Termination is asynchronous on the server, so after signalling the reaper
/// polls the activity view until the backends are gone or the settle timeout
/// passes. Running it against a database with no connections is a no-op.
#[derive(Debug, Clone)]
pub struct ConnectionReaper {
    poll_interval: Duration,
    settle_timeout: Duration,
}

impl ConnectionReaper {
    pub fn new(poll_interval: Duration, settle_timeout: Duration) -> Self {
        Self {
            poll_interval,
            settle_timeout,
        }
    }

    pub fn from_config(config: &TestDatabaseConfig) -> Self {
        Self::new(config.reap_poll_interval, config.reap_settle_timeout)
    }

    pub async fn terminate(
        &self,
        admin: &mut AdminConnection,
        database: &DatabaseName,
    ) -> Result<ReapReport, sqlx::Error> {
        let started = Instant::now();

        let terminated: i64 = sqlx::query_scalar(TERMINATE_SQL)
            .bind(database.as_str())
            .fetch_one(admin.connection())
            .await?;

        if terminated > 0 {
            info!(
                database = %database,
                terminated,
                "🔌 Terminated active connections"
            );
        } else {
            debug!(database = %database, "No active connections to terminate");
        }

        let remaining = self.wait_until_settled(admin, database, started).await?;
        let report = ReapReport {
            terminated,
            remaining,
            waited: started.elapsed(),
        };

        if !report.settled() {
            warn!(
                database = %database,
                remaining,
                waited_ms = report.waited.as_millis() as u64,
                "⚠️ Connections still present after settle timeout"
            );
        }

        Ok(report)
    }

    async fn wait_until_settled(
        &self,
        admin: &mut AdminConnection,
        database: &DatabaseName,
        started: Instant,
    ) -> Result<i64, sqlx::Error> {
        loop {
            let remaining: i64 = sqlx::query_scalar(REMAINING_SQL)
                .bind(database.as_str())
                .fetch_one(admin.connection())
                .await?;

            if remaining == 0 || started.elapsed() >= self.settle_timeout {
                return Ok(remaining);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl Default for ConnectionReaper {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(5))
    }
}
