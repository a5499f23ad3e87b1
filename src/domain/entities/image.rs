//! Domain types for image handling.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;

use crate::domain::errors::DownloadError;

/// A decoded bitmap together with its display scale.
///
/// Cloning is cheap: the pixel buffer is shared.
#[derive(Clone)]
pub struct Image {
    bitmap: Arc<image::DynamicImage>,
    scale: f32,
}

impl Image {
    /// Wraps a decoded bitmap at the given scale.
    ///
    /// Non-finite or non-positive scales fall back to `1.0`.
    #[must_use]
    pub fn new(bitmap: image::DynamicImage, scale: f32) -> Self {
        Self::from_shared(Arc::new(bitmap), scale)
    }

    /// Wraps an already shared bitmap.
    #[must_use]
    pub fn from_shared(bitmap: Arc<image::DynamicImage>, scale: f32) -> Self {
        let scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        };
        Self { bitmap, scale }
    }

    /// Returns the underlying bitmap.
    #[must_use]
    pub fn bitmap(&self) -> &Arc<image::DynamicImage> {
        &self.bitmap
    }

    /// Returns the display scale.
    #[must_use]
    pub const fn scale(&self) -> f32 {
        self.scale
    }

    /// Width of the backing bitmap in pixels.
    #[must_use]
    pub fn pixel_width(&self) -> u32 {
        self.bitmap.width()
    }

    /// Height of the backing bitmap in pixels.
    #[must_use]
    pub fn pixel_height(&self) -> u32 {
        self.bitmap.height()
    }

    /// Logical size in points (pixels divided by scale).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn size(&self) -> (f32, f32) {
        (
            self.pixel_width() as f32 / self.scale,
            self.pixel_height() as f32 / self.scale,
        )
    }

    /// Memory budget charged to a cache for this image.
    ///
    /// Four bytes per backing pixel (points × scale in each dimension), regardless of the
    /// source encoding.
    #[must_use]
    pub fn memory_cost(&self) -> u64 {
        u64::from(self.pixel_width()) * u64::from(self.pixel_height()) * 4
    }

    /// Returns a new image sharing this image's scale.
    #[must_use]
    pub fn with_bitmap(&self, bitmap: image::DynamicImage) -> Self {
        Self::new(bitmap, self.scale)
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        #[allow(clippy::float_cmp)]
        let same_scale = self.scale == other.scale;
        same_scale && (Arc::ptr_eq(&self.bitmap, &other.bitmap) || self.bitmap == other.bitmap)
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.pixel_width())
            .field("height", &self.pixel_height())
            .field("scale", &self.scale)
            .finish()
    }
}

/// How a request may use previously stored images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Use a stored image when one exists.
    #[default]
    UseProtocolCachePolicy,
    /// Use a stored image, loading from the network otherwise.
    ReturnCacheDataElseLoad,
    /// Only use a stored image; a miss fails with [`DownloadError::NotCached`].
    ReturnCacheDataDontLoad,
    /// Never consult the cache.
    ReloadIgnoringCacheData,
}

impl CachePolicy {
    /// Returns true if a stored image may satisfy the request.
    #[must_use]
    pub const fn allows_cached_image(self) -> bool {
        matches!(
            self,
            Self::UseProtocolCachePolicy
                | Self::ReturnCacheDataElseLoad
                | Self::ReturnCacheDataDontLoad
        )
    }
}

/// Describes one image to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    url: String,
    cache_policy: CachePolicy,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl ImageRequest {
    /// Creates a request for the given URL with the default cache policy.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cache_policy: CachePolicy::default(),
            headers: Vec::new(),
            timeout: None,
        }
    }

    /// Sets the cache policy.
    #[must_use]
    pub const fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the URL as supplied by the caller.
    #[must_use]
    pub fn raw_url(&self) -> &str {
        &self.url
    }

    /// How the cache may satisfy this request.
    #[must_use]
    pub const fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    /// Extra HTTP headers, in insertion order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Per-request timeout overriding the fetcher default.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Parses the URL.
    ///
    /// # Errors
    /// Returns [`DownloadError::InvalidRequest`] if the URL is malformed.
    pub fn url(&self) -> Result<Url, DownloadError> {
        Url::parse(&self.url)
            .map_err(|e| DownloadError::invalid_request(format!("invalid URL {:?}: {e}", self.url)))
    }

    /// Identifier shared by every request for the same resource.
    ///
    /// # Errors
    /// Returns [`DownloadError::InvalidRequest`] if the URL is malformed.
    pub fn identifier(&self) -> Result<String, DownloadError> {
        self.url().map(String::from)
    }

    /// Cache key prefix for this request: the normalized URL when it parses, the raw
    /// string otherwise.
    #[must_use]
    pub fn url_key(&self) -> String {
        self.identifier().unwrap_or_else(|_| self.url.clone())
    }
}

/// Builds the cache key for a URL and an optional disambiguator.
///
/// An empty additional identifier yields the same key as none at all.
#[must_use]
pub fn image_cache_key(url_key: &str, additional_identifier: Option<&str>) -> String {
    match additional_identifier {
        Some(extra) if !extra.is_empty() => format!("{url_key}-{extra}"),
        _ => url_key.to_string(),
    }
}

/// Response metadata handed back alongside a downloaded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMetadata {
    /// Final URL after redirects.
    pub url: String,
    /// HTTP status code (200 for local files).
    pub status: u16,
    /// MIME type reported by the server, if any.
    pub content_type: Option<String>,
    /// Body length in bytes.
    pub content_length: u64,
}

impl ResponseMetadata {
    /// Returns the MIME essence (`image/png` for `image/png; charset=binary`), lowercased.
    #[must_use]
    pub fn mime_type(&self) -> Option<String> {
        self.content_type.as_deref().and_then(|ct| {
            let essence = ct.split(';').next().unwrap_or_default().trim();
            (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
        })
    }
}

/// Basic-auth credential attached to every download.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Basic-auth user name.
    pub username: String,
    /// Basic-auth password, if any.
    pub password: Option<String>,
}

impl Credential {
    /// Creates a credential.
    #[must_use]
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_cost_counts_four_bytes_per_pixel() {
        let image = Image::new(image::DynamicImage::new_rgb8(205, 200), 1.0);
        assert_eq!(image.memory_cost(), 164_000);
    }

    #[test]
    fn test_size_is_scaled() {
        let image = Image::new(image::DynamicImage::new_rgba8(200, 100), 2.0);
        assert_eq!(image.size(), (100.0, 50.0));
        assert_eq!(image.memory_cost(), 80_000);
    }

    #[test]
    fn test_invalid_scale_falls_back() {
        let image = Image::new(image::DynamicImage::new_rgba8(1, 1), 0.0);
        assert!((image.scale() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_identifier_is_normalized() {
        let request = ImageRequest::new("HTTPS://Example.com/a/../image.png");
        assert_eq!(request.identifier().unwrap(), "https://example.com/image.png");
    }

    #[test]
    fn test_malformed_url_is_invalid_request() {
        let request = ImageRequest::new("not a url");
        assert!(matches!(
            request.identifier(),
            Err(DownloadError::InvalidRequest { .. })
        ));
        assert_eq!(request.url_key(), "not a url");
    }

    #[test]
    fn test_cache_key_empty_identifier_matches_none() {
        let url = "https://example.com/image.png";
        assert_eq!(image_cache_key(url, None), url);
        assert_eq!(image_cache_key(url, Some("")), url);
        assert_eq!(
            image_cache_key(url, Some("blur-3")),
            "https://example.com/image.png-blur-3"
        );
    }

    #[test]
    fn test_cache_policy_permissions() {
        assert!(CachePolicy::UseProtocolCachePolicy.allows_cached_image());
        assert!(CachePolicy::ReturnCacheDataDontLoad.allows_cached_image());
        assert!(!CachePolicy::ReloadIgnoringCacheData.allows_cached_image());
    }

    #[test]
    fn test_mime_type_essence() {
        let metadata = ResponseMetadata {
            url: "https://example.com/a.png".to_string(),
            status: 200,
            content_type: Some("Image/PNG; charset=binary".to_string()),
            content_length: 10,
        };
        assert_eq!(metadata.mime_type().as_deref(), Some("image/png"));
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let credential = Credential::new("user", Some("secret".to_string()));
        assert!(!format!("{credential:?}").contains("secret"));
    }
}
