//! Configuration Error Types
//!
//! Specific, actionable error messages for configuration loading failures.

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// Required environment variable missing or empty
    #[error("Required environment variable '{variable}' is not set or empty: {context}")]
    MissingEnvironmentVariable { variable: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Database URL could not be parsed or rewritten
    #[error("Invalid database URL '{url}': {reason}")]
    InvalidDatabaseUrl { url: String, reason: String },

    /// Generated database name exceeds what the server can represent
    #[error("Database name '{name}' is {length} bytes, the server limit is {limit}")]
    DatabaseNameTooLong {
        name: String,
        length: usize,
        limit: usize,
    },

    /// Failure reported by the settings loader
    #[error("Failed to load settings: {0}")]
    LoadFailed(String),
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        ConfigurationError::LoadFailed(err.to_string())
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
