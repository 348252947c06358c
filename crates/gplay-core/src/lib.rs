//! gplay Core - configuration and shared types
//!
//! This crate holds the configuration model for the gplay CLI, the logic
//! for discovering and validating configuration files, and the error types
//! those operations produce.

pub mod config;
pub mod error;

pub use config::{Config, EditsConfig};
pub use error::{ConfigError, Result};
