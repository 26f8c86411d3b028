//! # Database Operations
//!
//! SQLx-backed database layer shared by the web service and the test harness.
//!
//! ## Key Components
//!
//! - [`connection`] - Production connection pool
//! - [`session`] - Shared session handles with explicit transaction control
//! - [`schema`] - Schema materialization and catalog verification
//! - [`error_codes`] - SQLSTATE constants used to classify server errors

pub mod connection;
pub mod error_codes;
pub mod schema;
pub mod session;

pub use connection::DatabaseConnection;
pub use error_codes::PgErrorCode;
pub use schema::{SchemaDefinition, SqlSchema, TableDefinition};
pub use session::{DbSession, SessionConnection, SessionError, SessionGuard, SessionResult};
