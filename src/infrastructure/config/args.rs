use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "photocache",
    version,
    about = "Fetch remote images once and serve them from a local cache",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Cache root directory.
    #[arg(long, value_name = "DIR", env = "PHOTOCACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Request timeout in seconds.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Maximum simultaneous downloads.
    #[arg(long, global = true)]
    pub max_concurrent_fetches: Option<usize>,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Fetch images into the cache, downloading only what is missing.
    Get {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print where each URL is cached.
    Path {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// List cached entries.
    List {
        /// Print entries as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove every cached entry.
    Clear,
}
