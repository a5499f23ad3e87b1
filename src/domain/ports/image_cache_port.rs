//! Port definition for image caching.

use crate::domain::entities::{Image, ImageRequest, image_cache_key};

/// Identifier-keyed image store.
/// Implementations must be thread-safe.
pub trait ImageCache: Send + Sync {
    /// Stores an image, replacing any image with the same identifier.
    fn add(&self, image: Image, identifier: &str);

    /// Removes an image. Returns true if something was removed.
    fn remove_image(&self, identifier: &str) -> bool;

    /// Removes every image. Returns true if the cache was non-empty.
    fn remove_all_images(&self) -> bool;

    /// Returns the image for the identifier, if cached.
    fn image(&self, identifier: &str) -> Option<Image>;

    /// Current memory charged to cached images, in bytes.
    fn memory_usage(&self) -> u64;
}

/// Image store addressed by request plus an optional disambiguator (usually a filter
/// identifier).
pub trait ImageRequestCache: ImageCache {
    /// Stores an image for a request.
    fn add_for_request(
        &self,
        image: Image,
        request: &ImageRequest,
        additional_identifier: Option<&str>,
    ) {
        let key = image_cache_key(&request.url_key(), additional_identifier);
        self.add(image, &key);
    }

    /// Removes the image for a request.
    fn remove_image_for_request(
        &self,
        request: &ImageRequest,
        additional_identifier: Option<&str>,
    ) -> bool {
        let key = image_cache_key(&request.url_key(), additional_identifier);
        self.remove_image(&key)
    }

    /// Removes every variant cached for the request's URL.
    fn remove_images_matching(&self, request: &ImageRequest) -> bool;

    /// Returns the image for a request, if cached.
    fn image_for_request(
        &self,
        request: &ImageRequest,
        additional_identifier: Option<&str>,
    ) -> Option<Image> {
        let key = image_cache_key(&request.url_key(), additional_identifier);
        self.image(&key)
    }
}
