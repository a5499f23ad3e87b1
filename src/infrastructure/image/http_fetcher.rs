//! reqwest-backed fetcher for `http(s)://` and `file://` image URLs.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use crate::domain::entities::{Credential, ImageRequest, ResponseMetadata};
use crate::domain::errors::{DownloadError, DownloadResult};
use crate::domain::ports::{FetchedResponse, ImageFetcher};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fetches images over HTTP, or from disk for `file://` URLs.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    /// Creates a fetcher with the given timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(timeout: Duration) -> DownloadResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                DownloadError::configuration(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_http(
        &self,
        url: reqwest::Url,
        request: &ImageRequest,
        credential: Option<&Credential>,
    ) -> DownloadResult<FetchedResponse> {
        let mut builder = self.client.get(url.clone());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout() {
            builder = builder.timeout(timeout);
        }
        if let Some(credential) = credential {
            builder = builder.basic_auth(&credential.username, credential.password.as_ref());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DownloadError::transport(format!("Request failed: {e}")))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadError::transport(format!("Failed to read body: {e}")))?;

        debug!(url = %final_url, status = status, size = body.len(), "Fetched image response");

        Ok(FetchedResponse {
            metadata: ResponseMetadata {
                url: final_url,
                status,
                content_type,
                content_length: body.len() as u64,
            },
            body,
        })
    }

    async fn fetch_file(url: reqwest::Url) -> DownloadResult<FetchedResponse> {
        let path = url
            .to_file_path()
            .map_err(|()| DownloadError::invalid_request(format!("not a local file URL: {url}")))?;

        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| DownloadError::transport(format!("Failed to read {}: {e}", path.display())))?;

        trace!(path = %path.display(), size = body.len(), "Read image file");

        let content_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(content_type_for_extension)
            .map(String::from);

        Ok(FetchedResponse {
            metadata: ResponseMetadata {
                url: url.to_string(),
                status: 200,
                content_type,
                content_length: body.len() as u64,
            },
            body: Bytes::from(body),
        })
    }
}

/// Maps a file extension to the MIME type servers would report for it.
#[must_use]
pub fn content_type_for_extension(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        "ico" => Some("image/x-icon"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(
        &self,
        request: &ImageRequest,
        credential: Option<&Credential>,
    ) -> Result<FetchedResponse, DownloadError> {
        let url = request.url()?;
        match url.scheme() {
            "http" | "https" => self.fetch_http(url, request, credential).await,
            "file" => Self::fetch_file(url).await,
            scheme => Err(DownloadError::invalid_request(format!(
                "unsupported URL scheme: {scheme}"
            ))),
        }
    }
}
