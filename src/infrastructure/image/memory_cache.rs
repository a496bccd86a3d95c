//! In-memory LRU tier for decoded images.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::CacheKey;
use crate::domain::ports::ImageCachePort;

/// Default maximum number of decoded images kept in memory.
pub const DEFAULT_CACHE_SIZE: usize = 64;

/// LRU cache of decoded images keyed by [`CacheKey`].
///
/// The lock is never held across an await point.
pub struct MemoryImageCache {
    cache: Mutex<LruCache<CacheKey, Arc<image::DynamicImage>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a cache holding at most `capacity` images (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let cache = self.cache.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: cache.len(),
            capacity: cache.cap().get(),
        }
    }

    /// Looks an image up without promoting it or touching the statistics.
    #[must_use]
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        self.cache.lock().peek(key).cloned()
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

/// Statistics about the memory tier.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Maximum number of cached images.
    pub capacity: usize,
}

impl CacheStats {
    /// Statistics of a disabled tier.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            hits: 0,
            misses: 0,
            hit_rate: 0.0,
            size: 0,
            capacity: 0,
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Memory: {}/{} images, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.capacity, self.hit_rate, self.hits, self.misses
        )
    }
}

#[async_trait::async_trait]
impl ImageCachePort for MemoryImageCache {
    async fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        let found = self.cache.lock().get(key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
        }
        found
    }

    async fn put(&self, key: CacheKey, image: Arc<image::DynamicImage>) {
        trace!(key = %key, "Storing image in memory cache");
        self.cache.lock().put(key, image);
    }

    async fn evict(&self, key: &CacheKey) {
        if self.cache.lock().pop(key).is_some() {
            debug!(key = %key, "Evicted image from memory cache");
        }
    }

    fn len(&self) -> usize {
        self.cache.lock().len()
    }

    async fn clear(&self) {
        self.cache.lock().clear();
        debug!("Cleared memory image cache");
    }
}
