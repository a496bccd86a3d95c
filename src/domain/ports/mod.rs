//! Port definitions implemented by the infrastructure layer.

mod image_cache_port;

pub use image_cache_port::{ImageCachePort, ImageFetcherPort, ImageLoaderPort};
