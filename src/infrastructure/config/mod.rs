//! Application configuration.

/// Configuration file model.
pub mod app_config;
/// Command-line arguments.
pub mod args;
/// Configuration file loading.
pub mod storage;

pub use app_config::{AppConfig, CacheConfig, LogLevel};
pub use args::{CliArgs, Command};
pub use storage::{ConfigError, ConfigStore};
