//! Port definition for fetching raw image responses.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::{Credential, ImageRequest, ResponseMetadata};
use crate::domain::errors::DownloadError;

/// Raw response produced by a fetcher, before validation and decoding.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// Status, content type and final URL.
    pub metadata: ResponseMetadata,
    /// Raw response body.
    pub body: Bytes,
}

/// Port for issuing network (or file) requests.
///
/// Dropping the returned future cancels the operation.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Performs the request and returns the raw response.
    async fn fetch(
        &self,
        request: &ImageRequest,
        credential: Option<&Credential>,
    ) -> Result<FetchedResponse, DownloadError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tokio::sync::Semaphore;

    /// Encodes a blank PNG of the given size.
    pub fn png_bytes(width: u32, height: u32) -> Bytes {
        let mut buf = Vec::new();
        image::DynamicImage::new_rgba8(width, height)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("encode png");
        Bytes::from(buf)
    }

    /// Builds a successful PNG response.
    pub fn png_response(url: &str, width: u32, height: u32) -> FetchedResponse {
        let body = png_bytes(width, height);
        FetchedResponse {
            metadata: ResponseMetadata {
                url: url.to_string(),
                status: 200,
                content_type: Some("image/png".to_string()),
                content_length: body.len() as u64,
            },
            body,
        }
    }

    /// Mock fetcher for testing.
    ///
    /// Responds with a 4x4 PNG unless a response was scripted for the URL. In gated
    /// mode every fetch waits for a call to [`MockImageFetcher::release`].
    pub struct MockImageFetcher {
        calls: AtomicUsize,
        started: Mutex<Vec<String>>,
        responses: Mutex<HashMap<String, Result<FetchedResponse, DownloadError>>>,
        gate: Option<Arc<Semaphore>>,
        last_credential: Mutex<Option<Credential>>,
    }

    impl MockImageFetcher {
        /// Creates a mock that responds immediately.
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                started: Mutex::new(Vec::new()),
                responses: Mutex::new(HashMap::new()),
                gate: None,
                last_credential: Mutex::new(None),
            }
        }

        /// Creates a mock whose fetches block until released.
        pub fn gated() -> Self {
            Self {
                gate: Some(Arc::new(Semaphore::new(0))),
                ..Self::new()
            }
        }

        /// Scripts the result for a URL.
        pub fn respond_with(&self, url: &str, result: Result<FetchedResponse, DownloadError>) {
            self.responses.lock().insert(url.to_string(), result);
        }

        /// Lets `count` blocked fetches finish.
        pub fn release(&self, count: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(count);
            }
        }

        /// Number of fetches issued.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// URLs in the order their fetches started.
        pub fn started(&self) -> Vec<String> {
            self.started.lock().clone()
        }

        /// Credential seen by the most recent fetch.
        pub fn last_credential(&self) -> Option<Credential> {
            self.last_credential.lock().clone()
        }
    }

    impl Default for MockImageFetcher {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ImageFetcher for MockImageFetcher {
        async fn fetch(
            &self,
            request: &ImageRequest,
            credential: Option<&Credential>,
        ) -> Result<FetchedResponse, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.lock().push(request.raw_url().to_string());
            *self.last_credential.lock() = credential.cloned();

            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|e| DownloadError::transport(e.to_string()))?
                    .forget();
            }

            let scripted = self.responses.lock().get(request.raw_url()).cloned();
            scripted.unwrap_or_else(|| Ok(png_response(request.raw_url(), 4, 4)))
        }
    }
}
