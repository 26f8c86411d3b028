//! PostgreSQL Error Codes
//!
//! Constants for the SQLSTATE codes the provisioning and session code branches on.
//! Outcomes are always decided by code, never by matching on message text.
//!
//! ## SQLSTATE Format
//!
//! - 5-character codes representing error classes and conditions
//! - First 2 characters: error class
//! - Last 3 characters: specific condition
//!
//! ## Reference
//!
//! Full list: <https://www.postgresql.org/docs/current/errcodes-appendix.html>

/// PostgreSQL SQLSTATE error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PgErrorCode;

impl PgErrorCode {
    // =========================================================================
    // Class 3D - Invalid Catalog Name
    // =========================================================================

    /// Invalid catalog name - Code 3D000
    ///
    /// Returned when connecting to (or otherwise naming) a database that does
    /// not exist. Expected after a worker database has been torn down.
    pub const INVALID_CATALOG_NAME: &'static str = "3D000";

    // =========================================================================
    // Class 42 - Syntax Error or Access Rule Violation
    // =========================================================================

    /// Duplicate database - Code 42P04
    ///
    /// CREATE DATABASE raced with another creator of the same name.
    pub const DUPLICATE_DATABASE: &'static str = "42P04";

    // =========================================================================
    // Class 55 - Object Not In Prerequisite State
    // =========================================================================

    /// Object in use - Code 55006
    ///
    /// DROP DATABASE while other sessions are still connected to it.
    pub const OBJECT_IN_USE: &'static str = "55006";

    // =========================================================================
    // Helper Methods
    // =========================================================================

    #[inline]
    pub fn is_invalid_catalog_name(code: &str) -> bool {
        code == Self::INVALID_CATALOG_NAME
    }

    #[inline]
    pub fn is_duplicate_database(code: &str) -> bool {
        code == Self::DUPLICATE_DATABASE
    }

    #[inline]
    pub fn is_object_in_use(code: &str) -> bool {
        code == Self::OBJECT_IN_USE
    }

    /// SQLSTATE of a driver error, if it came from the server
    pub fn of(error: &sqlx::Error) -> Option<String> {
        match error {
            sqlx::Error::Database(db_error) => db_error.code().map(|code| code.into_owned()),
            _ => None,
        }
    }
}
