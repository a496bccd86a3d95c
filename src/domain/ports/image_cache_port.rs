//! Port definitions for image caching and fetching.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::{CacheKey, LoadedImage};
use crate::domain::errors::CacheResult;

/// Port for an in-process cache of decoded images.
/// Implementations must be thread-safe.
#[async_trait]
pub trait ImageCachePort: Send + Sync {
    /// Attempts to get an image from the cache.
    /// Returns None if not cached.
    async fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>>;

    /// Stores an image in the cache.
    async fn put(&self, key: CacheKey, image: Arc<image::DynamicImage>);

    /// Removes an image from the cache.
    async fn evict(&self, key: &CacheKey);

    /// Returns the current number of cached images.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all images from the cache.
    async fn clear(&self);
}

/// Port for fetching raw image bytes from a remote location.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageFetcherPort: Send + Sync {
    /// Downloads the body behind `url`.
    ///
    /// Non-success responses are errors.
    async fn fetch(&self, url: &str) -> CacheResult<Bytes>;
}

/// Port for resolving an image URL through every cache tier.
#[async_trait]
pub trait ImageLoaderPort: Send + Sync {
    /// Loads an image, checking caches first then network.
    async fn load(&self, url: &str) -> CacheResult<LoadedImage>;

    /// Loads an image, treating every failure as "no image".
    async fn load_or_none(&self, url: &str) -> Option<LoadedImage> {
        self.load(url).await.ok()
    }

    /// Aborts the in-flight load for `url`, if any.
    fn cancel(&self, url: &str) -> bool;
}
