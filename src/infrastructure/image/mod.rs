//! Image caching infrastructure.
//!
//! This module provides:
//! - Memory caching with LRU eviction
//! - Disk caching for persistence across runs
//! - HTTP fetching with bounded retries
//! - The orchestrator that ties them together and coalesces duplicate requests

pub mod codec;
pub mod disk_cache;
pub mod http_fetcher;
pub mod memory_cache;
pub mod remote_cache;
pub mod single_flight;

pub use disk_cache::{CacheEntry, DiskImageCache};
pub use http_fetcher::HttpImageFetcher;
pub use memory_cache::{CacheStats, MemoryImageCache};
pub use remote_cache::{ImageLoadedEvent, RemoteCacheConfig, RemoteImageCache};
pub use single_flight::SingleFlight;
