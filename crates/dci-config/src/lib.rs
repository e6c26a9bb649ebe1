//! KDL configuration parsing for the DCI server.
//!
//! This crate handles:
//! - Server configuration files (`dci.kdl`)
//! - Environment variable overrides

pub mod error;
pub mod server;

pub use error::{ConfigError, ConfigResult};
pub use server::{DatabaseConfig, LogFormat, LoggingConfig, ServerConfig, ServerSection};
