//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::args::CliArgs;
use crate::infrastructure::image::{RemoteCacheConfig, memory_cache::DEFAULT_CACHE_SIZE};

pub(crate) const APP_NAME: &str = "photocache";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "photocache";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration, read from `config.toml` and overridden by CLI flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log file path. Logs go to stderr unless this is set.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Image cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Image cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache root. Defaults to the per-user cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Decoded images kept in memory; 0 disables the memory tier.
    #[serde(default = "default_memory_cache_size")]
    pub memory_cache_size: usize,

    /// Byte budget for the cache root. Unset means entries are never evicted.
    #[serde(default)]
    pub max_disk_bytes: Option<u64>,

    /// Maximum simultaneous downloads. Unset means unbounded.
    #[serde(default)]
    pub max_concurrent_fetches: Option<usize>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after a transient network failure.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_memory_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retries() -> u32 {
    1
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            memory_cache_size: default_memory_cache_size(),
            max_disk_bytes: None,
            max_concurrent_fetches: None,
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
        }
    }
}

impl CacheConfig {
    /// Returns the request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the orchestrator settings.
    #[must_use]
    pub const fn remote_cache_config(&self) -> RemoteCacheConfig {
        RemoteCacheConfig {
            memory_cache_size: self.memory_cache_size,
            max_concurrent_fetches: self.max_concurrent_fetches,
        }
    }
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache.cache_dir = Some(cache_dir.clone());
        }
        if let Some(timeout_secs) = args.timeout_secs {
            self.cache.timeout_secs = timeout_secs;
        }
        if let Some(max_concurrent_fetches) = args.max_concurrent_fetches {
            self.cache.max_concurrent_fetches = Some(max_concurrent_fetches);
        }
    }

    /// Returns the cache root to use.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache
            .cache_dir
            .clone()
            .unwrap_or_else(crate::infrastructure::image::disk_cache::default_cache_root)
    }
}
