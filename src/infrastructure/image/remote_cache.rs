//! Remote image cache orchestrator.
//!
//! Resolves a URL through two tiers before touching the network:
//! Memory -> Disk -> Network. Every disk and network step runs in a
//! background task, and concurrent requests for the same key share one task.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{CacheKey, ImageSource, ImageUrl, LoadedImage};
use crate::domain::errors::{CacheError, CacheErrorKind, CacheResult};
use crate::domain::ports::{ImageCachePort, ImageFetcherPort, ImageLoaderPort};

use super::codec;
use super::disk_cache::DiskImageCache;
use super::http_fetcher::HttpImageFetcher;
use super::memory_cache::{CacheStats, DEFAULT_CACHE_SIZE, MemoryImageCache};
use super::single_flight::SingleFlight;

/// Message sent when a background load finishes.
#[derive(Debug, Clone)]
pub struct ImageLoadedEvent {
    /// The requested URL.
    pub url: String,
    /// The loaded image, or why there is none.
    pub result: CacheResult<LoadedImage>,
}

/// Tuning for [`RemoteImageCache`].
#[derive(Debug, Clone)]
pub struct RemoteCacheConfig {
    /// Maximum decoded images kept in memory. Zero disables the tier.
    pub memory_cache_size: usize,
    /// Maximum simultaneous network fetches. `None` means unbounded.
    pub max_concurrent_fetches: Option<usize>,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            memory_cache_size: DEFAULT_CACHE_SIZE,
            max_concurrent_fetches: None,
        }
    }
}

/// Fetches remote images once and serves them from local storage afterwards.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RemoteImageCache {
    handle: LoaderHandle,
    flights: Arc<SingleFlight<CacheKey, LoadedImage>>,
    config: RemoteCacheConfig,
}

impl std::fmt::Debug for RemoteImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteImageCache")
            .field("root", &self.handle.disk_cache.root())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RemoteImageCache {
    /// Creates a cache over the given store and fetcher.
    #[must_use]
    pub fn new(
        config: RemoteCacheConfig,
        disk_cache: Arc<DiskImageCache>,
        fetcher: Arc<dyn ImageFetcherPort>,
    ) -> Self {
        let memory_cache = (config.memory_cache_size > 0)
            .then(|| Arc::new(MemoryImageCache::new(config.memory_cache_size)));
        let fetch_permits = config
            .max_concurrent_fetches
            .map(|permits| Arc::new(Semaphore::new(permits.max(1))));

        Self {
            handle: LoaderHandle {
                memory_cache,
                disk_cache,
                fetcher,
                fetch_permits,
            },
            flights: Arc::new(SingleFlight::new()),
            config,
        }
    }

    /// Creates a cache in the per-user cache directory with an HTTP fetcher.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn with_defaults() -> CacheResult<Self> {
        let disk_cache = Arc::new(DiskImageCache::default_location(None));
        let fetcher = Arc::new(HttpImageFetcher::with_defaults()?);
        Ok(Self::new(RemoteCacheConfig::default(), disk_cache, fetcher))
    }

    /// Resolves `url` to an image.
    ///
    /// # Errors
    /// - [`CacheError::InvalidInput`] if `url` is not an absolute http(s) URL.
    /// - [`CacheError::StorageRead`] if the cached entry is unreadable. The
    ///   network is not consulted in that case.
    /// - [`CacheError::Network`] or [`CacheError::Decode`] if the fetch fails.
    ///
    /// A failure to persist a fetched image is logged and does not fail the
    /// request.
    pub async fn get_image(&self, url: &str) -> CacheResult<LoadedImage> {
        let image_url = ImageUrl::parse(url)?;
        let key = image_url.cache_key();

        if let Some(memory) = &self.handle.memory_cache
            && let Some(image) = memory.get(&key).await
        {
            return Ok(LoadedImage {
                url: url.to_string(),
                key,
                image,
                source: ImageSource::Memory,
            });
        }

        let handle = self.handle.clone();
        self.flights
            .run(key.clone(), move || handle.resolve(image_url, key))
            .await
    }

    /// Resolves `url`, treating every failure as "no image".
    ///
    /// Failures are logged and never raised.
    pub async fn get_image_or_none(&self, url: &str) -> Option<LoadedImage> {
        match self.get_image(url).await {
            Ok(loaded) => Some(loaded),
            Err(e) => {
                match e.kind() {
                    CacheErrorKind::InvalidInput | CacheErrorKind::Cancelled => {
                        debug!(url, error = %e, "No image");
                    }
                    _ => warn!(url, error = %e, "No image"),
                }
                None
            }
        }
    }

    /// Starts loading `url` in the background.
    ///
    /// The outcome is delivered on `events`. Must be called within a Tokio
    /// runtime.
    pub fn load_async(
        &self,
        url: impl Into<String>,
        events: &mpsc::UnboundedSender<ImageLoadedEvent>,
    ) {
        let cache = self.clone();
        let events = events.clone();
        let url = url.into();
        tokio::spawn(async move {
            let result = cache.get_image(&url).await;
            if events.send(ImageLoadedEvent { url, result }).is_err() {
                trace!("Image event receiver dropped");
            }
        });
    }

    /// Starts loading every URL in the background.
    pub fn prefetch_batch<I>(&self, urls: I, events: &mpsc::UnboundedSender<ImageLoadedEvent>)
    where
        I: IntoIterator<Item = String>,
    {
        for url in urls {
            self.load_async(url, events);
        }
    }

    /// Aborts the in-flight request for `url`.
    ///
    /// Returns false if nothing was in flight.
    pub fn cancel(&self, url: &str) -> bool {
        let cancelled = self.flights.cancel(&CacheKey::derive(url));
        if cancelled {
            debug!(url, "Cancelled image load");
        }
        cancelled
    }

    /// Aborts every in-flight request.
    pub fn cancel_all(&self) {
        let count = self.flights.cancel_all();
        if count > 0 {
            debug!(count, "Cancelled all pending image loads");
        }
    }

    /// Returns true if a disk or network load for `url` is running.
    #[must_use]
    pub fn is_loading(&self, url: &str) -> bool {
        self.flights.contains(&CacheKey::derive(url))
    }

    /// Returns the number of running loads.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.flights.len()
    }

    /// Returns where the entry for `url` is or would be stored.
    ///
    /// `None` for malformed URLs.
    #[must_use]
    pub fn cache_path(&self, url: &str) -> Option<PathBuf> {
        ImageUrl::parse(url)
            .ok()
            .map(|u| self.handle.disk_cache.path_for(&u.cache_key()))
    }

    /// Returns true if `url` has an entry on disk.
    pub async fn contains(&self, url: &str) -> bool {
        match ImageUrl::parse(url) {
            Ok(u) => self.handle.disk_cache.contains(&u.cache_key()).await,
            Err(_) => false,
        }
    }

    /// Returns memory tier statistics.
    #[must_use]
    pub fn memory_cache_stats(&self) -> CacheStats {
        self.handle
            .memory_cache
            .as_ref()
            .map_or_else(CacheStats::disabled, |m| m.stats())
    }

    /// Returns the disk store.
    #[must_use]
    pub fn disk(&self) -> &DiskImageCache {
        &self.handle.disk_cache
    }

    /// Clears both tiers and returns how many disk entries were removed.
    ///
    /// # Errors
    /// Returns error if the cache root cannot be listed.
    pub async fn clear_all(&self) -> CacheResult<usize> {
        if let Some(memory) = &self.handle.memory_cache {
            memory.clear().await;
        }
        let removed = self.handle.disk_cache.clear().await?;
        info!(removed, "Cleared image caches");
        Ok(removed)
    }
}

#[async_trait]
impl ImageLoaderPort for RemoteImageCache {
    async fn load(&self, url: &str) -> CacheResult<LoadedImage> {
        self.get_image(url).await
    }

    async fn load_or_none(&self, url: &str) -> Option<LoadedImage> {
        self.get_image_or_none(url).await
    }

    fn cancel(&self, url: &str) -> bool {
        Self::cancel(self, url)
    }
}

/// The pieces a background load needs, owned so it can outlive the caller.
#[derive(Clone)]
struct LoaderHandle {
    memory_cache: Option<Arc<MemoryImageCache>>,
    disk_cache: Arc<DiskImageCache>,
    fetcher: Arc<dyn ImageFetcherPort>,
    fetch_permits: Option<Arc<Semaphore>>,
}

impl LoaderHandle {
    async fn resolve(self, url: ImageUrl, key: CacheKey) -> CacheResult<LoadedImage> {
        let cached = self.disk_cache.get(&key).await.inspect_err(|e| {
            warn!(url = %url, key = %key, error = %e, "Unreadable cache entry");
        })?;

        if let Some(image) = cached {
            self.remember(&key, &image).await;
            return Ok(LoadedImage {
                url: url.to_string(),
                key,
                image,
                source: ImageSource::Disk,
            });
        }

        let bytes = {
            let _permit = match &self.fetch_permits {
                Some(permits) => Some(
                    Arc::clone(permits)
                        .acquire_owned()
                        .await
                        .map_err(|e| CacheError::internal(format!("fetch pool closed: {e}")))?,
                ),
                None => None,
            };
            debug!(url = %url, key = %key, "Downloading image from network");
            self.fetcher.fetch(url.as_str()).await?
        };

        let image = Arc::new(codec::decode(bytes).await.inspect_err(|e| {
            debug!(url = %url, error = %e, "Fetched bytes are not an image");
        })?);

        if let Err(e) = self.disk_cache.put_image(&key, Arc::clone(&image)).await {
            warn!(url = %url, key = %key, error = %e, "Failed to cache image to disk");
        }

        self.remember(&key, &image).await;

        debug!(url = %url, source = "network", "Image loaded successfully");

        Ok(LoadedImage {
            url: url.to_string(),
            key,
            image,
            source: ImageSource::Network,
        })
    }

    async fn remember(&self, key: &CacheKey, image: &Arc<image::DynamicImage>) {
        if let Some(memory) = &self.memory_cache {
            memory.put(key.clone(), Arc::clone(image)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::{MockFetcher, MockImageFetcherPort};
    use crate::infrastructure::image::codec::fixtures::png_bytes;
    use bytes::Bytes;
    use futures_util::future::join_all;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    const URL_A: &str = "https://x/a.png";
    const URL_B: &str = "https://x/b.png";

    struct Fixture {
        cache: RemoteImageCache,
        fetcher: Arc<MockFetcher>,
        _temp: TempDir,
    }

    impl Fixture {
        fn root(&self) -> PathBuf {
            self.cache.disk().root().to_path_buf()
        }

        fn files(&self) -> Vec<PathBuf> {
            match std::fs::read_dir(self.root()) {
                Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
                Err(_) => Vec::new(),
            }
        }
    }

    fn fixture_with(fetcher: MockFetcher, config: RemoteCacheConfig) -> Fixture {
        let temp = TempDir::new().unwrap();
        let disk = Arc::new(DiskImageCache::new(temp.path().join("ImageCache"), None));
        let fetcher = Arc::new(fetcher);
        let cache = RemoteImageCache::new(config, disk, fetcher.clone());
        Fixture {
            cache,
            fetcher,
            _temp: temp,
        }
    }

    fn fixture(fetcher: MockFetcher) -> Fixture {
        fixture_with(fetcher, RemoteCacheConfig::default())
    }

    fn without_memory() -> RemoteCacheConfig {
        RemoteCacheConfig {
            memory_cache_size: 0,
            ..RemoteCacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_cache_then_hit_fetches_once() {
        let fx = fixture(MockFetcher::new().serve(URL_A, png_bytes(4, 4)));

        let first = fx.cache.get_image(URL_A).await.unwrap();
        let second = fx.cache.get_image(URL_A).await.unwrap();

        assert_eq!(first.source, ImageSource::Network);
        assert_eq!(second.source, ImageSource::Memory);
        assert_eq!(fx.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_second_request_hits_disk_without_memory_tier() {
        let fx = fixture_with(
            MockFetcher::new().serve(URL_A, png_bytes(4, 4)),
            without_memory(),
        );

        fx.cache.get_image(URL_A).await.unwrap();
        let second = fx.cache.get_image(URL_A).await.unwrap();

        assert_eq!(second.source, ImageSource::Disk);
        assert_eq!(fx.fetcher.calls(), 1);
        assert_eq!(fx.cache.memory_cache_stats(), CacheStats::disabled());
    }

    #[tokio::test]
    async fn test_entries_survive_a_new_instance() {
        let fx = fixture(MockFetcher::new().serve(URL_A, png_bytes(4, 4)));
        fx.cache.get_image(URL_A).await.unwrap();

        let fresh_fetcher = Arc::new(MockFetcher::new());
        let reopened = RemoteImageCache::new(
            RemoteCacheConfig::default(),
            Arc::new(DiskImageCache::new(fx.root(), None)),
            fresh_fetcher.clone(),
        );
        let loaded = reopened.get_image(URL_A).await.unwrap();

        assert_eq!(loaded.source, ImageSource::Disk);
        assert_eq!(fresh_fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_distinct_urls_use_distinct_files() {
        let fx = fixture(
            MockFetcher::new()
                .serve(URL_A, png_bytes(2, 2))
                .serve(URL_B, png_bytes(3, 3)),
        );

        let a = fx.cache.get_image(URL_A).await.unwrap();
        let b = fx.cache.get_image(URL_B).await.unwrap();

        assert_ne!(fx.cache.cache_path(URL_A), fx.cache.cache_path(URL_B));
        assert_eq!(fx.files().len(), 2);
        assert_eq!(a.dimensions(), (2, 2));
        assert_eq!(b.dimensions(), (3, 3));
    }

    #[tokio::test]
    async fn test_miss_populates_one_pixel_identical_entry() {
        let fetched = png_bytes(6, 5);
        let fx = fixture(MockFetcher::new().serve(URL_A, fetched.clone()));
        assert!(fx.files().is_empty());

        let loaded = fx.cache.get_image(URL_A).await.unwrap();

        let files = fx.files();
        assert_eq!(files.len(), 1);
        assert_eq!(Some(files[0].clone()), fx.cache.cache_path(URL_A));

        let original = image::load_from_memory(&fetched).unwrap().to_rgb8();
        let persisted = image::open(&files[0]).unwrap().to_rgb8();
        assert_eq!(loaded.image.to_rgb8(), original);
        assert_eq!(persisted, original);
    }

    #[tokio::test]
    async fn test_network_failure_leaves_root_unchanged() {
        let url = "https://nonexistent.invalid/x.png";
        let fx = fixture(MockFetcher::new().fail(url, CacheError::network("dns error")));

        let err = fx.cache.get_image(url).await.unwrap_err();

        assert_eq!(err.kind(), CacheErrorKind::Network);
        assert!(!fx.root().exists());
        assert!(fx.cache.get_image_or_none(url).await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_host_over_http() {
        let temp = TempDir::new().unwrap();
        let disk = Arc::new(DiskImageCache::new(temp.path().join("images"), None));
        let fetcher = Arc::new(HttpImageFetcher::new(Duration::from_secs(5), 0).unwrap());
        let cache = RemoteImageCache::new(RemoteCacheConfig::default(), disk, fetcher);

        let result = cache.get_image_or_none("https://nonexistent.invalid/x.png").await;

        assert!(result.is_none());
        assert!(!temp.path().join("images").exists());
    }

    #[tokio::test]
    async fn test_malformed_url_is_invalid_input() {
        let fx = fixture(MockFetcher::new());

        let result = fx.cache.get_image("not a url").await;
        let err = assert_err!(result);

        assert_eq!(err.kind(), CacheErrorKind::InvalidInput);
        assert!(fx.cache.get_image_or_none("not a url").await.is_none());
        assert_eq!(fx.fetcher.calls(), 0);
        assert_eq!(fx.cache.cache_path("not a url"), None);
    }

    #[tokio::test]
    async fn test_concurrent_requests_coalesce() {
        let fx = fixture(
            MockFetcher::new()
                .with_delay(Duration::from_millis(50))
                .serve(URL_A, png_bytes(4, 4)),
        );

        let results = join_all((0..10).map(|_| {
            let cache = fx.cache.clone();
            async move { cache.get_image(URL_A).await }
        }))
        .await;

        assert_eq!(fx.fetcher.calls(), 1);
        assert_eq!(results.len(), 10);
        for result in results {
            assert_eq!(assert_ok!(result).dimensions(), (4, 4));
        }
        assert_eq!(fx.files().len(), 1);
        assert_eq!(fx.cache.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_consistent() {
        let fx = fixture(
            MockFetcher::new()
                .with_delay(Duration::from_millis(50))
                .fail(URL_A, CacheError::http_status(503, "HTTP 503")),
        );

        let results = join_all((0..5).map(|_| fx.cache.get_image(URL_A))).await;

        assert_eq!(fx.fetcher.calls(), 1);
        assert!(
            results
                .iter()
                .all(|r| r.as_ref().is_err_and(|e| e.status() == Some(503)))
        );
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_not_refetched() {
        let fx = fixture(MockFetcher::new().serve(URL_A, png_bytes(4, 4)));
        let path = fx.cache.cache_path(URL_A).unwrap();
        std::fs::create_dir_all(fx.root()).unwrap();
        std::fs::write(&path, b"truncated").unwrap();

        let err = fx.cache.get_image(URL_A).await.unwrap_err();

        assert_eq!(err.kind(), CacheErrorKind::StorageRead);
        assert_eq!(fx.fetcher.calls(), 0);
        assert_eq!(std::fs::read(&path).unwrap(), b"truncated");
    }

    #[tokio::test]
    async fn test_undecodable_body_is_not_cached() {
        let fx = fixture(MockFetcher::new().serve(URL_A, Bytes::from_static(b"<html></html>")));

        let err = fx.cache.get_image(URL_A).await.unwrap_err();

        assert_eq!(err.kind(), CacheErrorKind::Decode);
        assert!(fx.files().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_still_returns_image() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("ImageCache");
        std::fs::write(&root, b"not a directory").unwrap();
        let fetcher = Arc::new(MockFetcher::new().serve(URL_A, png_bytes(4, 4)));
        let cache = RemoteImageCache::new(
            without_memory(),
            Arc::new(DiskImageCache::new(root, None)),
            fetcher.clone(),
        );

        let loaded = cache.get_image(URL_A).await.unwrap();

        assert_eq!(loaded.source, ImageSource::Network);
        assert!(!cache.contains(URL_A).await);
    }

    #[tokio::test]
    async fn test_tight_budget_still_serves_second_request_from_disk() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new().serve(URL_A, png_bytes(32, 32)));
        let cache = RemoteImageCache::new(
            without_memory(),
            Arc::new(DiskImageCache::new(temp.path().join("images"), Some(64))),
            fetcher.clone(),
        );

        let first = cache.get_image(URL_A).await.unwrap();
        assert_eq!(first.source, ImageSource::Network);
        assert!(cache.contains(URL_A).await);

        let second = cache.get_image(URL_A).await.unwrap();
        assert_eq!(second.source, ImageSource::Disk);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_load_async_reports_on_channel() {
        let fx = fixture(MockFetcher::new().serve(URL_A, png_bytes(4, 4)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let urls = vec![URL_A.to_string(), "not a url".to_string()];
        fx.cache.prefetch_batch(urls, &tx);

        let mut events = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        events.sort_by(|a, b| a.url.cmp(&b.url));

        assert_eq!(events[0].url, URL_A);
        assert!(events[0].result.is_ok());
        assert_eq!(events[1].url, "not a url");
        assert_eq!(
            events[1].result.as_ref().unwrap_err().kind(),
            CacheErrorKind::InvalidInput
        );
    }

    #[tokio::test]
    async fn test_cancel_in_flight_request() {
        let fx = fixture(
            MockFetcher::new()
                .with_delay(Duration::from_secs(30))
                .serve(URL_A, png_bytes(4, 4)),
        );

        let waiter = {
            let cache = fx.cache.clone();
            tokio::spawn(async move { cache.get_image(URL_A).await })
        };
        while !fx.cache.is_loading(URL_A) {
            tokio::task::yield_now().await;
        }

        assert!(ImageLoaderPort::cancel(&fx.cache, URL_A));
        let err = waiter.await.unwrap().unwrap_err();

        assert_eq!(err.kind(), CacheErrorKind::Cancelled);
        assert!(!fx.cache.is_loading(URL_A));
        assert!(fx.files().is_empty());
    }

    #[tokio::test]
    async fn test_bounded_fetch_pool_serves_everything() {
        let fx = fixture_with(
            MockFetcher::new()
                .with_delay(Duration::from_millis(10))
                .serve(URL_A, png_bytes(2, 2))
                .serve(URL_B, png_bytes(2, 2)),
            RemoteCacheConfig {
                max_concurrent_fetches: Some(1),
                ..RemoteCacheConfig::default()
            },
        );

        let (a, b) = tokio::join!(fx.cache.get_image(URL_A), fx.cache.get_image(URL_B));

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(fx.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_clear_all_forces_refetch() {
        let fx = fixture(MockFetcher::new().serve(URL_A, png_bytes(2, 2)));
        fx.cache.get_image(URL_A).await.unwrap();

        assert_eq!(fx.cache.clear_all().await.unwrap(), 1);
        let again = fx.cache.get_image(URL_A).await.unwrap();

        assert_eq!(again.source, ImageSource::Network);
        assert_eq!(fx.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_loader_port_with_mocked_fetcher() {
        let png = png_bytes(3, 3);
        let mut fetcher = MockImageFetcherPort::new();
        fetcher
            .expect_fetch()
            .withf(|url| url.ends_with("/a.png"))
            .times(1)
            .returning(move |_| Ok(Bytes::from(png.clone())));

        let temp = TempDir::new().unwrap();
        let cache = RemoteImageCache::new(
            without_memory(),
            Arc::new(DiskImageCache::new(temp.path().to_path_buf(), None)),
            Arc::new(fetcher),
        );
        let loader: &dyn ImageLoaderPort = &cache;

        assert!(loader.load_or_none(URL_A).await.is_some());
        assert_eq!(loader.load(URL_A).await.unwrap().source, ImageSource::Disk);
    }
}
