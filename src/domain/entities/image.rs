//! Domain types for cached remote images.

use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::domain::errors::{CacheError, CacheResult};

/// Extension of every persisted entry. Entries are always re-encoded as PNG.
pub const CACHE_EXTENSION: &str = "png";

/// Encoded URLs longer than this are truncated and suffixed with a digest,
/// keeping file names under the usual 255 byte limit.
const MAX_STEM_LEN: usize = 200;

/// Filesystem-safe identifier derived from an image URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a URL string.
    ///
    /// Every byte outside `[A-Za-z0-9-_.~]` is percent-encoded, so the
    /// result never contains a path separator or a character reserved on
    /// common filesystems. Total: any input yields a key.
    #[must_use]
    pub fn derive(url: &str) -> Self {
        let encoded = urlencoding::encode(url);
        let stem = if encoded.len() > MAX_STEM_LEN {
            // The encoding is pure ASCII, so any index is a char boundary.
            format!("{}-{}", &encoded[..MAX_STEM_LEN], url_digest(url))
        } else {
            encoded.into_owned()
        };
        Self(format!("{stem}.{CACHE_EXTENSION}"))
    }

    /// Rebuilds a key from a file name found in the cache root.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        name.strip_suffix(CACHE_EXTENSION)
            .and_then(|stem| stem.strip_suffix('.'))
            .map(|_| Self(name.to_string()))
    }

    /// Returns the key as a file name.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.0
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn url_digest(url: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// A validated absolute http(s) URL pointing at an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUrl {
    raw: String,
    parsed: Url,
}

impl ImageUrl {
    /// Parses and validates an image URL.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidInput`] if the string is not an absolute
    /// http or https URL with a host.
    pub fn parse(input: &str) -> CacheResult<Self> {
        let parsed = Url::parse(input)
            .map_err(|e| CacheError::invalid_input(format!("{input:?}: {e}")))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CacheError::invalid_input(format!(
                "{input:?}: unsupported scheme {}",
                parsed.scheme()
            )));
        }

        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(CacheError::invalid_input(format!("{input:?}: missing host")));
        }

        Ok(Self {
            raw: input.to_string(),
            parsed,
        })
    }

    /// Returns the URL exactly as the caller supplied it.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the parsed URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.parsed
    }

    /// Derives the cache key from the original string.
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(&self.raw)
    }
}

impl std::fmt::Display for ImageUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from the in-memory LRU tier.
    Memory,
    /// Loaded from the cache root on disk.
    Disk,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A decoded image together with how it was obtained.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The URL that was requested.
    pub url: String,
    /// Key of the persisted entry.
    pub key: CacheKey,
    /// The decoded image.
    pub image: Arc<image::DynamicImage>,
    /// Which tier satisfied the request.
    pub source: ImageSource,
}

impl LoadedImage {
    /// Returns a copy of this image tagged with another source.
    #[must_use]
    pub fn with_source(&self, source: ImageSource) -> Self {
        Self {
            source,
            ..self.clone()
        }
    }

    /// Returns `(width, height)` of the decoded image.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}
