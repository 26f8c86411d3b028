//! Worker identity and worker database naming.

use crate::config::{ConfigResult, ConfigurationError};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

pub const TEST_DB_NAME_PREFIX: &str = "test_db_";

/// Id the coordinating worker runs under when tests are not distributed
pub const PRIMARY_WORKER_ID: &str = "master";

pub const WORKER_ID_VAR: &str = "TEST_WORKER_ID";

/// PostgreSQL truncates identifiers beyond this many bytes (NAMEDATALEN - 1)
pub const MAX_IDENTIFIER_BYTES: usize = 63;

fn non_word_runs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\W+").expect("static pattern compiles"))
}

/// Map every maximal run of non-word characters to a single `_`
pub fn sanitize_worker_id(raw: &str) -> String {
    if raw == PRIMARY_WORKER_ID {
        return PRIMARY_WORKER_ID.to_string();
    }
    non_word_runs().replace_all(raw, "_").into_owned()
}

/// Identifier of one test-execution worker, as reported by the runner
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn primary() -> Self {
        Self(PRIMARY_WORKER_ID.to_string())
    }

    /// Worker id from `TEST_WORKER_ID`, or the primary worker when unset
    pub fn from_env() -> Self {
        match std::env::var(WORKER_ID_VAR) {
            Ok(raw) if !raw.trim().is_empty() => Self(raw.trim().to_string()),
            _ => Self::primary(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_primary(&self) -> bool {
        self.0 == PRIMARY_WORKER_ID
    }

    pub fn sanitized(&self) -> String {
        sanitize_worker_id(&self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a worker's private database: `test_db_<sanitized worker id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseName(String);

impl DatabaseName {
    pub fn for_worker(worker_id: &WorkerId) -> ConfigResult<Self> {
        let token = worker_id.sanitized();
        if token.is_empty() {
            return Err(ConfigurationError::InvalidValue {
                field: WORKER_ID_VAR.to_string(),
                value: worker_id.to_string(),
                context: "worker id is empty".to_string(),
            });
        }

        let name = format!("{TEST_DB_NAME_PREFIX}{token}");
        if name.len() > MAX_IDENTIFIER_BYTES {
            return Err(ConfigurationError::DatabaseNameTooLong {
                length: name.len(),
                name,
                limit: MAX_IDENTIFIER_BYTES,
            });
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted identifier for use in DDL
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0.replace('"', "\"\""))
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
