//! HTTP adapter for [`ImageFetcherPort`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::ImageFetcherPort;

const USER_AGENT: &str = concat!("photocache/", env!("CARGO_PKG_VERSION"));

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries after a transient failure.
pub const DEFAULT_RETRIES: u32 = 1;

const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Fetches image bytes with a plain GET.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: Client,
    retries: u32,
    backoff: Duration,
}

/// Outcome of a single attempt that did not produce a body.
struct AttemptError {
    error: CacheError,
    transient: bool,
}

impl HttpImageFetcher {
    /// Creates a fetcher with the given timeout and retry budget.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(timeout: Duration, retries: u32) -> CacheResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            retries,
            backoff: RETRY_BACKOFF,
        })
    }

    /// Creates a fetcher with default timeout and retries.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn with_defaults() -> CacheResult<Self> {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_RETRIES)
    }

    /// Overrides the delay between attempts.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, url: &str) -> Result<Bytes, AttemptError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            let transient = e.is_timeout() || e.is_connect();
            let message = if e.is_timeout() {
                "request timed out".to_string()
            } else if e.is_connect() {
                format!("failed to connect: {e}")
            } else {
                format!("request failed: {e}")
            };
            AttemptError {
                error: CacheError::network(message),
                transient,
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError {
                error: CacheError::http_status(
                    status.as_u16(),
                    format!(
                        "HTTP {}: {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("Unknown")
                    ),
                ),
                transient: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            });
        }

        response.bytes().await.map_err(|e| AttemptError {
            error: CacheError::network(format!("failed to read body: {e}")),
            transient: e.is_timeout(),
        })
    }
}

#[async_trait]
impl ImageFetcherPort for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> CacheResult<Bytes> {
        let mut attempt = 0;
        loop {
            match self.attempt(url).await {
                Ok(bytes) => {
                    debug!(url, size = bytes.len(), attempt, "Fetched image");
                    return Ok(bytes);
                }
                Err(failure) if failure.transient && attempt < self.retries => {
                    attempt += 1;
                    warn!(url, attempt, error = %failure.error, "Transient fetch failure, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(failure) => {
                    debug!(url, error = %failure.error, "Fetch failed");
                    return Err(failure.error);
                }
            }
        }
    }
}
