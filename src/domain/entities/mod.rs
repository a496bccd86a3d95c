//! Domain entity definitions.

mod image;

pub use self::image::{CACHE_EXTENSION, CacheKey, ImageSource, ImageUrl, LoadedImage};
