//! Persistent image store under a single cache root.
//!
//! One PNG file per URL, named by its [`CacheKey`]. The directory listing is
//! the index; there is no manifest.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};
use crate::infrastructure::config::app_config::{APP_NAME, APP_ORGANIZATION, APP_QUALIFIER};

use super::codec;

/// A file in the cache root.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    /// Key the entry is stored under.
    pub key: CacheKey,
    /// Absolute path of the entry.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Last write or disk hit, if the filesystem reports one.
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip)]
    last_used: SystemTime,
}

/// Disk-backed store of PNG-encoded images.
#[derive(Debug, Clone)]
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: Option<u64>,
}

impl DiskImageCache {
    /// Creates a store rooted at `cache_dir`.
    ///
    /// The directory is created lazily on the first write. With
    /// `max_size = None` entries are never evicted.
    #[must_use]
    pub const fn new(cache_dir: PathBuf, max_size: Option<u64>) -> Self {
        Self {
            cache_dir,
            max_size,
        }
    }

    /// Creates a store in the per-user cache directory.
    #[must_use]
    pub fn default_location(max_size: Option<u64>) -> Self {
        Self::new(default_cache_root(), max_size)
    }

    /// Returns the cache root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path an entry is (or would be) stored at.
    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.file_name())
    }

    /// Checks if an entry exists.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }

    /// Reads the raw bytes of an entry.
    ///
    /// Returns `Ok(None)` when there is no entry, including when the cache
    /// root is missing or unusable.
    ///
    /// # Errors
    /// Returns [`CacheError::StorageRead`] if the entry exists but cannot be read.
    pub async fn read_bytes(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                debug!(key = %key, path = %path.display(), "Cache path is not a file, treating as miss");
                return Ok(None);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(key = %key, "Disk cache miss");
                return Ok(None);
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Cache entry unreachable, treating as miss");
                return Ok(None);
            }
        }

        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(key = %key, "Disk cache miss");
                Ok(None)
            }
            Err(e) => Err(CacheError::storage_read(format!(
                "{}: {e}",
                path.display()
            ))),
        }
    }

    /// Loads and decodes an entry.
    ///
    /// # Errors
    /// Returns [`CacheError::StorageRead`] if the entry cannot be read or is
    /// not a decodable image. A corrupt entry is left in place.
    pub async fn get(&self, key: &CacheKey) -> CacheResult<Option<Arc<image::DynamicImage>>> {
        let Some(bytes) = self.read_bytes(key).await? else {
            return Ok(None);
        };

        match codec::decode(bytes.into()).await {
            Ok(img) => {
                debug!(key = %key, "Decoded image from disk cache");
                self.touch(key).await;
                Ok(Some(Arc::new(img)))
            }
            Err(e) => Err(CacheError::storage_read(format!(
                "corrupt entry {key}: {e}"
            ))),
        }
    }

    /// Encodes `image` as PNG and stores it under `key`.
    ///
    /// # Errors
    /// Returns [`CacheError::StorageWrite`] if encoding or writing fails.
    pub async fn put_image(
        &self,
        key: &CacheKey,
        image: Arc<image::DynamicImage>,
    ) -> CacheResult<()> {
        let png = codec::encode_png(image).await?;
        self.put_bytes(key, png).await
    }

    /// Stores already-encoded bytes under `key`.
    ///
    /// The write goes to a temporary file in the cache root which is then
    /// renamed over the entry, so readers never observe a partial file.
    ///
    /// # Errors
    /// Returns [`CacheError::StorageWrite`] if the root cannot be created or
    /// the file cannot be written.
    pub async fn put_bytes(&self, key: &CacheKey, bytes: Vec<u8>) -> CacheResult<()> {
        fs::create_dir_all(&self.cache_dir).await.map_err(|e| {
            CacheError::storage_write(format!(
                "failed to create cache root {}: {e}",
                self.cache_dir.display()
            ))
        })?;

        let path = self.path_for(key);
        let dir = self.cache_dir.clone();
        let target = path.clone();
        let size = bytes.len();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp_file = tempfile::NamedTempFile::new_in(&dir)?;
            temp_file.write_all(&bytes)?;
            temp_file.as_file().sync_all()?;
            temp_file.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::internal(format!("write task panicked: {e}")))?
        .map_err(|e| CacheError::storage_write(format!("{}: {e}", path.display())))?;

        debug!(key = %key, path = %path.display(), size, "Stored image in disk cache");

        self.cleanup_if_needed(key).await;

        Ok(())
    }

    /// Bumps the modification time of an entry so eviction sees it as recently used.
    async fn touch(&self, key: &CacheKey) {
        if self.max_size.is_none() {
            return;
        }
        let path = self.path_for(key);
        let result = tokio::task::spawn_blocking(move || {
            std::fs::File::options()
                .write(true)
                .open(&path)?
                .set_modified(SystemTime::now())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(key = %key, error = %e, "Failed to touch cache entry"),
            Err(e) => trace!(key = %key, error = %e, "Touch task failed"),
        }
    }

    /// Removes an entry.
    pub async fn evict(&self, key: &CacheKey) {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => debug!(key = %key, "Evicted from disk cache"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(key = %key, error = %e, "Failed to evict from disk cache"),
        }
    }

    /// Lists every entry in the cache root.
    ///
    /// A missing root is an empty cache.
    ///
    /// # Errors
    /// Returns [`CacheError::StorageRead`] if the root cannot be listed.
    pub async fn entries(&self) -> CacheResult<Vec<CacheEntry>> {
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CacheError::storage_read(format!(
                    "failed to list {}: {e}",
                    self.cache_dir.display()
                )));
            }
        };

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::storage_read(format!("failed to read entry: {e}")))?
        {
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(CacheKey::from_file_name) else {
                continue;
            };
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().ok();
            found.push(CacheEntry {
                key,
                path: entry.path(),
                size: meta.len(),
                modified: modified.map(DateTime::<Utc>::from),
                last_used: modified.unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }

    /// Removes every entry and returns how many were removed.
    ///
    /// # Errors
    /// Returns [`CacheError::StorageRead`] if the root cannot be listed.
    pub async fn clear(&self) -> CacheResult<usize> {
        let mut removed = 0;
        for entry in self.entries().await? {
            if let Err(e) = fs::remove_file(&entry.path).await {
                warn!(path = %entry.path.display(), error = %e, "Failed to remove cache file");
            } else {
                removed += 1;
            }
        }
        debug!(removed, "Cleared disk cache");
        Ok(removed)
    }

    /// Returns the total size of all entries in bytes.
    ///
    /// # Errors
    /// Returns [`CacheError::StorageRead`] if the root cannot be listed.
    pub async fn total_size(&self) -> CacheResult<u64> {
        Ok(self.entries().await?.iter().map(|e| e.size).sum())
    }

    /// Returns the number of entries.
    ///
    /// # Errors
    /// Returns [`CacheError::StorageRead`] if the root cannot be listed.
    pub async fn len(&self) -> CacheResult<usize> {
        Ok(self.entries().await?.len())
    }

    /// Returns true if there are no entries.
    ///
    /// # Errors
    /// Returns [`CacheError::StorageRead`] if the root cannot be listed.
    pub async fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drops least recently used entries once the byte budget is exceeded,
    /// down to 90% of the budget.
    ///
    /// Recency is the file modification time, which writes and disk hits
    /// both update. The entry in `keep` is never removed.
    async fn cleanup_if_needed(&self, keep: &CacheKey) {
        let Some(max_size) = self.max_size else {
            return;
        };

        let mut files = match self.entries().await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Failed to scan disk cache for cleanup");
                return;
            }
        };

        let current_size: u64 = files.iter().map(|e| e.size).sum();
        if current_size <= max_size {
            return;
        }

        debug!(current_size, max_size, "Disk cache over budget, cleaning up");

        files.retain(|e| {
            if &e.key != keep {
                return true;
            }
            if e.size > max_size {
                warn!(key = %keep, size = e.size, max_size, "Entry exceeds disk cache budget, keeping it");
            }
            false
        });
        files.sort_by_key(|e| e.last_used);

        let target = current_size - max_size + (max_size / 10);
        let mut freed_size = 0u64;
        let mut freed_count = 0usize;

        for entry in files {
            if freed_size >= target {
                break;
            }
            if let Err(e) = fs::remove_file(&entry.path).await {
                warn!(path = %entry.path.display(), error = %e, "Failed to remove old cache file");
            } else {
                trace!(path = %entry.path.display(), "Removed old cache file");
                freed_size += entry.size;
                freed_count += 1;
            }
        }

        debug!(freed_size, freed_count, "Disk cache cleanup complete");
    }
}

/// Returns the per-user cache root.
#[must_use]
pub fn default_cache_root() -> PathBuf {
    directories::ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
        || std::env::temp_dir().join(APP_NAME).join("images"),
        |dirs| dirs.cache_dir().join("images"),
    )
}
