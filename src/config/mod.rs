//! # Configuration
//!
//! Explicit configuration values for the service and its test harness.
//!
//! ## Architecture
//!
//! - **No ambient globals**: values are constructed once at process start and
//!   passed by reference (or `Arc`) to whatever needs them
//! - **Environment-sourced**: [`Settings`] is loaded with the `config` crate from
//!   process environment (after `.env` is applied), [`TestDatabaseConfig`] is
//!   parsed directly from the handful of test variables it needs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use backend_api::config::{Settings, TestDatabaseConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! println!("allowed origins: {:?}", settings.allowed_origins());
//!
//! let test_config = TestDatabaseConfig::from_env()?;
//! println!("server base: {}", test_config.admin_url_redacted());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod settings;
pub mod test_database;

pub use error::{ConfigResult, ConfigurationError};
pub use settings::Settings;
pub use test_database::TestDatabaseConfig;
