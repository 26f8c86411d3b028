//! Error types for the backend service.
//!

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Dependency not registered: {0}")]
    DependencyNotRegistered(String),
    #[error("Session error: {0}")]
    SessionError(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        BackendError::DatabaseError(err.to_string())
    }
}

impl From<crate::config::ConfigurationError> for BackendError {
    fn from(err: crate::config::ConfigurationError) -> Self {
        BackendError::ConfigurationError(err.to_string())
    }
}

impl From<crate::database::SessionError> for BackendError {
    fn from(err: crate::database::SessionError) -> Self {
        BackendError::SessionError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        let err = BackendError::DependencyNotRegistered("database_session".to_string());
        assert_eq!(err.to_string(), "Dependency not registered: database_session");

        let err = BackendError::ConfigurationError("missing DATABASE_URL".to_string());
        assert!(err.to_string().starts_with("Configuration error:"));
    }
}
