//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{Image, ImageRequest};
pub use errors::{DecodeError, DownloadError};
pub use ports::{ImageCache, ImageFetcher, ImageFilter, ImageRequestCache};
