//! Port definitions for decoding and transforming images.

use crate::domain::entities::{Image, ResponseMetadata};
use crate::domain::errors::DecodeError;

/// A pure image transform with a stable identity.
///
/// The identifier disambiguates cache entries and lets the downloader run identical
/// transforms once per fetch, so two filters with equal identifiers must produce equal
/// output.
pub trait ImageFilter: Send + Sync {
    /// Stable identity string.
    fn identifier(&self) -> String;

    /// Applies the transform.
    fn apply(&self, image: &Image) -> Image;
}

/// Turns raw response bytes into an image.
pub trait ImageDecoder: Send + Sync {
    /// Decodes a response body.
    ///
    /// # Errors
    /// Returns [`DecodeError::EmptyBody`] for zero-length bodies and
    /// [`DecodeError::Corrupt`] for undecodable data.
    fn decode(&self, body: &[u8], metadata: &ResponseMetadata) -> Result<Image, DecodeError>;
}
