//! Image cache error types.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur while resolving an image.
///
/// Cloneable so a single failed fetch can be handed to every caller that
/// joined the same in-flight request.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum CacheError {
    #[error("invalid image url: {reason}")]
    InvalidInput { reason: String },

    #[error("failed to read cached image: {message}")]
    StorageRead { message: String },

    #[error("failed to write cached image: {message}")]
    StorageWrite { message: String },

    #[error("network error: {message}")]
    Network {
        message: String,
        status: Option<u16>,
    },

    #[error("failed to decode image: {message}")]
    Decode { message: String },

    #[error("image request was cancelled")]
    Cancelled,

    #[error("internal cache error: {message}")]
    Internal { message: String },
}

/// Coarse classification of a [`CacheError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheErrorKind {
    /// The URL string is not a well-formed absolute URL.
    InvalidInput,
    /// A cached entry exists but could not be read or decoded.
    StorageRead,
    /// Persisting a fetched image failed.
    StorageWrite,
    /// The fetch errored or returned a non-success status.
    Network,
    /// Fetched bytes are not a decodable image.
    Decode,
    /// The in-flight request was aborted.
    Cancelled,
    /// A background task panicked.
    Internal,
}

impl std::fmt::Display for CacheErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InvalidInput => "invalid-input",
            Self::StorageRead => "storage-read",
            Self::StorageWrite => "storage-write",
            Self::Network => "network",
            Self::Decode => "decode",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl CacheError {
    /// Creates an invalid input error.
    #[must_use]
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Creates a storage read error.
    #[must_use]
    pub fn storage_read(message: impl Into<String>) -> Self {
        Self::StorageRead {
            message: message.into(),
        }
    }

    /// Creates a storage write error.
    #[must_use]
    pub fn storage_write(message: impl Into<String>) -> Self {
        Self::StorageWrite {
            message: message.into(),
        }
    }

    /// Creates a network error without an HTTP status.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status: None,
        }
    }

    /// Creates a network error for a non-success HTTP status.
    #[must_use]
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> CacheErrorKind {
        match self {
            Self::InvalidInput { .. } => CacheErrorKind::InvalidInput,
            Self::StorageRead { .. } => CacheErrorKind::StorageRead,
            Self::StorageWrite { .. } => CacheErrorKind::StorageWrite,
            Self::Network { .. } => CacheErrorKind::Network,
            Self::Decode { .. } => CacheErrorKind::Decode,
            Self::Cancelled => CacheErrorKind::Cancelled,
            Self::Internal { .. } => CacheErrorKind::Internal,
        }
    }

    /// Returns true if the same request might succeed later.
    ///
    /// Network failures without a response, server errors and 429 qualify;
    /// other HTTP statuses are permanent.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network { status: None, .. } | Self::Cancelled => true,
            Self::Network {
                status: Some(status),
                ..
            } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns the HTTP status for network errors caused by a response.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Network { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            CacheError::invalid_input("x").kind(),
            CacheErrorKind::InvalidInput
        );
        assert_eq!(
            CacheError::storage_read("x").kind(),
            CacheErrorKind::StorageRead
        );
        assert_eq!(CacheError::network("x").kind(), CacheErrorKind::Network);
        assert_eq!(CacheError::Cancelled.kind(), CacheErrorKind::Cancelled);
    }

    #[test]
    fn test_http_status_is_kept() {
        let err = CacheError::http_status(404, "HTTP 404 Not Found");
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_transient());
        assert_eq!(CacheError::decode("bad").status(), None);
        assert!(!CacheError::decode("bad").is_transient());
    }

    #[test]
    fn test_transient_follows_retry_policy() {
        assert!(CacheError::network("connection refused").is_transient());
        assert!(CacheError::http_status(503, "HTTP 503").is_transient());
        assert!(CacheError::http_status(429, "HTTP 429").is_transient());
        assert!(!CacheError::http_status(403, "HTTP 403").is_transient());
        assert!(CacheError::Cancelled.is_transient());
        assert!(!CacheError::storage_write("disk full").is_transient());
    }

    #[test]
    fn test_display() {
        let err = CacheError::invalid_input("relative URL without a base");
        assert_eq!(
            err.to_string(),
            "invalid image url: relative URL without a base"
        );
        assert_eq!(CacheErrorKind::StorageWrite.to_string(), "storage-write");
    }
}
