//! Owner-side slot binding one displayed image to the downloader.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::entities::{Image, ImageRequest};
use crate::domain::ports::ImageFilter;
use crate::infrastructure::image::{DownloadResponse, ImageDownloader, RequestReceipt};

/// Loading state of an [`ImageView`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ImageViewStatus {
    /// No request has been made.
    #[default]
    NotStarted,
    /// Waiting on the downloader.
    Downloading,
    /// An image is displayed.
    Ready,
    /// The last request failed with an error message.
    Failed(String),
}

impl ImageViewStatus {
    /// True once an image has been delivered.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// True while a request is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Downloading)
    }
}

#[derive(Debug, Default)]
struct ViewState {
    image: Option<Image>,
    status: ImageViewStatus,
    /// Bumped on every new request so late completions from a replaced one are ignored.
    generation: u64,
}

/// Holds at most one outstanding receipt. Setting a new image cancels the held one.
///
/// Cancelled requests leave the displayed image untouched.
#[derive(Debug, Default)]
pub struct ImageView {
    receipt: Option<RequestReceipt>,
    state: Arc<Mutex<ViewState>>,
}

impl ImageView {
    /// Creates an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently displayed image.
    #[must_use]
    pub fn image(&self) -> Option<Image> {
        self.state.lock().image.clone()
    }

    /// Current loading state.
    #[must_use]
    pub fn status(&self) -> ImageViewStatus {
        self.state.lock().status.clone()
    }

    /// The receipt for the request in flight, if any.
    #[must_use]
    pub fn active_receipt(&self) -> Option<&RequestReceipt> {
        self.receipt.as_ref()
    }

    /// Requests an image, showing `placeholder` until it arrives.
    pub fn set_image(
        &mut self,
        downloader: &ImageDownloader,
        request: ImageRequest,
        filter: Option<Arc<dyn ImageFilter>>,
        placeholder: Option<Image>,
    ) {
        self.set_image_with_completion(downloader, request, filter, placeholder, |_| {});
    }

    /// Like [`ImageView::set_image`], also handing the response to `completion` after
    /// the view has been updated.
    pub fn set_image_with_completion<F>(
        &mut self,
        downloader: &ImageDownloader,
        request: ImageRequest,
        filter: Option<Arc<dyn ImageFilter>>,
        placeholder: Option<Image>,
        completion: F,
    ) where
        F: FnOnce(&DownloadResponse) + Send + 'static,
    {
        self.cancel_image_request(downloader);

        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.status = ImageViewStatus::Downloading;
            if placeholder.is_some() {
                state.image = placeholder;
            }
            state.generation
        };

        let state = self.state.clone();
        self.receipt = downloader.download(request, filter, move |response| {
            {
                let mut state = state.lock();
                if state.generation == generation {
                    match &response.result {
                        Ok(image) => {
                            state.image = Some(image.clone());
                            state.status = ImageViewStatus::Ready;
                        }
                        Err(error) if error.is_cancelled() => {}
                        Err(error) => state.status = ImageViewStatus::Failed(error.to_string()),
                    }
                }
            }
            completion(&response);
        });
    }

    /// Cancels the held receipt, if any.
    pub fn cancel_image_request(&mut self, downloader: &ImageDownloader) {
        if let Some(receipt) = self.receipt.take() {
            downloader.cancel_request(&receipt);
            let mut state = self.state.lock();
            if state.status.is_loading() {
                state.status = ImageViewStatus::NotStarted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::domain::ports::mocks::MockImageFetcher;

    fn placeholder() -> Image {
        Image::new(image::DynamicImage::new_rgba8(1, 1), 1.0)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<DownloadResponse>) -> DownloadResponse {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("completion in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_new_request_cancels_previous() {
        let fetcher = Arc::new(MockImageFetcher::gated());
        let downloader = ImageDownloader::builder(fetcher.clone()).build().unwrap();
        let mut view = ImageView::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first_tx = tx.clone();
        view.set_image_with_completion(
            &downloader,
            ImageRequest::new("https://example.com/old.png"),
            None,
            Some(placeholder()),
            move |response| {
                let _ = first_tx.send(response.clone());
            },
        );
        assert!(view.status().is_loading());
        assert_eq!(view.image().map(|i| i.pixel_width()), Some(1));
        let first_receipt = view.active_receipt().cloned().unwrap();

        let second_tx = tx.clone();
        view.set_image_with_completion(
            &downloader,
            ImageRequest::new("https://example.com/new.png"),
            None,
            None,
            move |response| {
                let _ = second_tx.send(response.clone());
            },
        );
        assert_ne!(view.active_receipt(), Some(&first_receipt));

        let cancelled = recv(&mut rx).await;
        assert!(cancelled.result.unwrap_err().is_cancelled());

        fetcher.release(1);
        let loaded = recv(&mut rx).await;
        assert!(loaded.result.is_ok());
        assert_eq!(view.status(), ImageViewStatus::Ready);
        assert_eq!(view.image().map(|i| i.pixel_width()), Some(4));
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let fetcher = Arc::new(MockImageFetcher::new());
        fetcher.respond_with(
            "https://example.com/broken.png",
            Err(crate::domain::errors::DownloadError::transport("offline")),
        );
        let downloader = ImageDownloader::builder(fetcher).build().unwrap();
        let mut view = ImageView::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        view.set_image_with_completion(
            &downloader,
            ImageRequest::new("https://example.com/broken.png"),
            None,
            None,
            move |response| {
                let _ = tx.send(response.clone());
            },
        );
        recv(&mut rx).await;

        assert!(matches!(view.status(), ImageViewStatus::Failed(message) if message.contains("offline")));
        assert!(view.image().is_none());
    }

    #[tokio::test]
    async fn test_explicit_cancel_resets_status() {
        let fetcher = Arc::new(MockImageFetcher::gated());
        let downloader = ImageDownloader::builder(fetcher).build().unwrap();
        let mut view = ImageView::new();

        view.set_image(&downloader, ImageRequest::new("https://example.com/a.png"), None, None);
        view.cancel_image_request(&downloader);

        assert!(view.active_receipt().is_none());
        assert_eq!(view.status(), ImageViewStatus::NotStarted);
        assert_eq!(downloader.pending_request_count(), 0);
    }
}
