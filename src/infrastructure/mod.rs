//! Infrastructure layer with adapters for the filesystem and the network.

/// Application configuration.
pub mod config;
/// Image caching, fetching and decoding.
pub mod image;

pub use config::{AppConfig, CacheConfig, CliArgs, Command, ConfigStore, LogLevel};
pub use self::image::{
    CacheEntry, CacheStats, DiskImageCache, HttpImageFetcher, ImageLoadedEvent, MemoryImageCache,
    RemoteCacheConfig, RemoteImageCache,
};
