//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, ImageSource, ImageUrl, LoadedImage};
pub use errors::{CacheError, CacheErrorKind, CacheResult};
pub use ports::{ImageCachePort, ImageFetcherPort, ImageLoaderPort};
