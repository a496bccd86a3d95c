//! Photocache - a persistent cache for remote images.
//!
//! Images are fetched once over HTTP, decoded, stored as PNG in a local cache
//! root and served from memory or disk on every later request.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing filesystem and network adapters.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "photocache";
