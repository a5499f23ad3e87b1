//! Image download coordinator.
//!
//! Deduplicates concurrent requests for the same URL into one fetch, bounds the number
//! of active fetches, decodes and filters on the blocking pool, populates the cache, and
//! delivers every completion on a single callback context.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::domain::entities::{
    CachePolicy, Credential, Image, ImageRequest, ResponseMetadata, image_cache_key,
};
use crate::domain::errors::{DecodeError, DownloadError, DownloadResult};
use crate::domain::ports::{FetchedResponse, ImageDecoder, ImageFetcher, ImageFilter, ImageRequestCache};

use super::callback_queue::{CallbackContext, SerialCallbackQueue};
use super::decoder::RasterImageDecoder;
use super::download_queue::{
    CancelOutcome, Completion, DownloadQueue, QueueOrder, Registration, StartTicket,
};
use super::memory_cache::AutoPurgingImageCache;

/// Default number of simultaneous fetches.
pub const DEFAULT_MAXIMUM_ACTIVE_DOWNLOADS: usize = 4;

/// MIME types accepted when response validation is enabled.
pub const DEFAULT_ACCEPTABLE_CONTENT_TYPES: &[&str] = &[
    "image/tiff",
    "image/jpeg",
    "image/gif",
    "image/png",
    "image/ico",
    "image/x-icon",
    "image/bmp",
    "image/x-bmp",
    "image/x-xbitmap",
    "image/x-ms-bmp",
    "image/x-win-bitmap",
    "image/heic",
    "image/heif",
    "image/webp",
    "application/octet-stream",
];

/// Configuration for the image downloader.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Maximum concurrent fetches. Must be positive.
    pub maximum_active_downloads: usize,
    /// Order in which queued downloads start.
    pub queue_order: QueueOrder,
    /// Check status codes and content types before decoding.
    pub validate_responses: bool,
    /// Accepted MIME types when validating.
    pub acceptable_content_types: HashSet<String>,
    /// Credential attached to every fetch.
    pub credential: Option<Credential>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            maximum_active_downloads: DEFAULT_MAXIMUM_ACTIVE_DOWNLOADS,
            queue_order: QueueOrder::default(),
            validate_responses: true,
            acceptable_content_types: DEFAULT_ACCEPTABLE_CONTENT_TYPES
                .iter()
                .map(|ct| (*ct).to_string())
                .collect(),
            credential: None,
        }
    }
}

/// What a completion handler receives.
#[derive(Debug, Clone)]
pub struct DownloadResponse {
    /// The caller's request. `None` for cache hits and malformed requests.
    pub request: Option<ImageRequest>,
    /// Response metadata. `None` unless a response was received.
    pub response: Option<ResponseMetadata>,
    /// The (possibly filtered) image, or why there is none.
    pub result: DownloadResult<Image>,
}

impl DownloadResponse {
    fn failure(
        request: Option<ImageRequest>,
        response: Option<ResponseMetadata>,
        error: DownloadError,
    ) -> Self {
        Self {
            request,
            response,
            result: Err(error),
        }
    }
}

/// Handle for one registration, used to cancel just that registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestReceipt {
    request: ImageRequest,
    identifier: String,
    download_id: Uuid,
    receipt_id: Uuid,
}

impl RequestReceipt {
    /// The request this receipt was issued for.
    #[must_use]
    pub const fn request(&self) -> &ImageRequest {
        &self.request
    }

    /// Identity of the underlying fetch; equal for every receipt sharing it.
    #[must_use]
    pub const fn download_id(&self) -> Uuid {
        self.download_id
    }

    /// Identity of this registration.
    #[must_use]
    pub const fn receipt_id(&self) -> Uuid {
        self.receipt_id
    }
}

struct Inner {
    queue: Mutex<DownloadQueue>,
    fetcher: Arc<dyn ImageFetcher>,
    decoder: Arc<dyn ImageDecoder>,
    cache: Option<Arc<dyn ImageRequestCache>>,
    callbacks: Arc<dyn CallbackContext>,
    credential: RwLock<Option<Credential>>,
    acceptable_content_types: RwLock<HashSet<String>>,
    validate_responses: bool,
    runtime: Handle,
}

/// Builds an [`ImageDownloader`].
pub struct ImageDownloaderBuilder {
    config: DownloaderConfig,
    fetcher: Arc<dyn ImageFetcher>,
    decoder: Arc<dyn ImageDecoder>,
    cache: Option<Arc<dyn ImageRequestCache>>,
    callbacks: Option<Arc<dyn CallbackContext>>,
    runtime: Option<Handle>,
}

impl ImageDownloaderBuilder {
    /// Replaces the configuration.
    #[must_use]
    pub fn config(mut self, config: DownloaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the cache. `None` disables caching.
    #[must_use]
    pub fn cache(mut self, cache: Option<Arc<dyn ImageRequestCache>>) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the decoder.
    #[must_use]
    pub fn decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replaces the context completions run on. Defaults to a [`SerialCallbackQueue`].
    #[must_use]
    pub fn callback_context(mut self, callbacks: Arc<dyn CallbackContext>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// Runtime that fetches are spawned on. Defaults to the current runtime.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Creates the downloader.
    ///
    /// # Errors
    /// Returns [`DownloadError::Configuration`] if the active download limit is zero or
    /// no runtime is available.
    pub fn build(self) -> DownloadResult<ImageDownloader> {
        if self.config.maximum_active_downloads == 0 {
            return Err(DownloadError::configuration(
                "maximum active downloads must be positive",
            ));
        }

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| DownloadError::configuration(format!("no tokio runtime: {e}")))?,
        };
        let callbacks = self
            .callbacks
            .unwrap_or_else(|| Arc::new(SerialCallbackQueue::spawn_on(&runtime)));

        debug!(
            maximum_active_downloads = self.config.maximum_active_downloads,
            queue_order = ?self.config.queue_order,
            caching = self.cache.is_some(),
            "Created image downloader"
        );

        Ok(ImageDownloader {
            inner: Arc::new(Inner {
                queue: Mutex::new(DownloadQueue::new(
                    self.config.maximum_active_downloads,
                    self.config.queue_order,
                )),
                fetcher: self.fetcher,
                decoder: self.decoder,
                cache: self.cache,
                callbacks,
                credential: RwLock::new(self.config.credential),
                acceptable_content_types: RwLock::new(self.config.acceptable_content_types),
                validate_responses: self.config.validate_responses,
                runtime,
            }),
        })
    }
}

/// Downloads images, sharing one fetch between every caller asking for the same URL.
///
/// Cloning is cheap and yields a handle to the same downloader.
#[derive(Clone)]
pub struct ImageDownloader {
    inner: Arc<Inner>,
}

static DEFAULT_DOWNLOADER: OnceLock<ImageDownloader> = OnceLock::new();

impl ImageDownloader {
    /// Starts building a downloader around a fetcher.
    ///
    /// Defaults: [`DownloaderConfig::default`], an [`AutoPurgingImageCache`] with default
    /// limits, a 1x [`RasterImageDecoder`], and a [`SerialCallbackQueue`].
    #[must_use]
    pub fn builder(fetcher: Arc<dyn ImageFetcher>) -> ImageDownloaderBuilder {
        ImageDownloaderBuilder {
            config: DownloaderConfig::default(),
            fetcher,
            decoder: Arc::new(RasterImageDecoder::default()),
            cache: Some(Arc::new(AutoPurgingImageCache::with_defaults())),
            callbacks: None,
            runtime: None,
        }
    }

    /// Installs this downloader as the process-wide default.
    ///
    /// The first installed downloader wins; later calls return it unchanged.
    pub fn install_default(self) -> &'static Self {
        DEFAULT_DOWNLOADER.get_or_init(|| self)
    }

    /// Returns the process-wide default, if one was installed.
    #[must_use]
    pub fn default_instance() -> Option<&'static Self> {
        DEFAULT_DOWNLOADER.get()
    }

    /// The cache this downloader reads and populates.
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<dyn ImageRequestCache>> {
        self.inner.cache.as_ref()
    }

    /// Replaces the credential attached to subsequent fetches.
    pub fn set_credential(&self, credential: Option<Credential>) {
        *self.inner.credential.write() = credential;
    }

    /// Accepts additional MIME types during validation.
    pub fn add_acceptable_content_types<I, S>(&self, content_types: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut acceptable = self.inner.acceptable_content_types.write();
        acceptable.extend(content_types.into_iter().map(|ct| ct.into().to_ascii_lowercase()));
    }

    /// Currently accepted MIME types, sorted.
    #[must_use]
    pub fn acceptable_content_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .inner
            .acceptable_content_types
            .read()
            .iter()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Number of fetches currently running.
    #[must_use]
    pub fn active_request_count(&self) -> usize {
        self.inner.queue.lock().active_count()
    }

    /// Number of downloads waiting for a free slot.
    #[must_use]
    pub fn queued_request_count(&self) -> usize {
        self.inner.queue.lock().queued_count()
    }

    /// Number of downloads that are queued or active.
    #[must_use]
    pub fn pending_request_count(&self) -> usize {
        self.inner.queue.lock().pending_count()
    }

    /// Downloads an image, optionally filtered.
    ///
    /// The completion runs exactly once on the callback context. Returns `None` when
    /// there is nothing to cancel: the image came from the cache or the request failed
    /// immediately.
    pub fn download<F>(
        &self,
        request: ImageRequest,
        filter: Option<Arc<dyn ImageFilter>>,
        completion: F,
    ) -> Option<RequestReceipt>
    where
        F: FnOnce(DownloadResponse) + Send + 'static,
    {
        let completion: Completion = Box::new(completion);

        let identifier = match request.identifier() {
            Ok(identifier) => identifier,
            Err(error) => {
                warn!(url = %request.raw_url(), error = %error, "Rejected image request");
                self.inner
                    .deliver(completion, DownloadResponse::failure(None, None, error));
                return None;
            }
        };

        let receipt_id = Uuid::new_v4();
        let registration = Registration {
            receipt_id,
            request: request.clone(),
            filter,
            completion,
        };

        let mut queue = self.inner.queue.lock();

        let registration = match queue.join(&identifier, registration) {
            Ok(download_id) => {
                debug!(identifier = %identifier, "Joined in-flight image download");
                return Some(RequestReceipt {
                    request,
                    identifier,
                    download_id,
                    receipt_id,
                });
            }
            Err(registration) => registration,
        };

        if request.cache_policy().allows_cached_image() {
            let filter_id = registration.filter.as_ref().map(|f| f.identifier());
            let cached = self
                .inner
                .cache
                .as_ref()
                .and_then(|cache| cache.image_for_request(&request, filter_id.as_deref()));

            if let Some(image) = cached {
                drop(queue);
                trace!(identifier = %identifier, "Serving image from cache");
                self.inner.deliver(
                    registration.completion,
                    DownloadResponse {
                        request: None,
                        response: None,
                        result: Ok(image),
                    },
                );
                return None;
            }

            if request.cache_policy() == CachePolicy::ReturnCacheDataDontLoad {
                drop(queue);
                debug!(identifier = %identifier, "Image not cached and loading is forbidden");
                self.inner.deliver(
                    registration.completion,
                    DownloadResponse::failure(Some(request), None, DownloadError::NotCached),
                );
                return None;
            }
        }

        let (download_id, ticket) =
            queue.insert(identifier.clone(), request.clone(), registration);
        if ticket.is_none() {
            debug!(
                identifier = %identifier,
                queued = queue.queued_count(),
                "Queued image download"
            );
        }
        drop(queue);

        if let Some(ticket) = ticket {
            self.inner.clone().start(ticket);
        }

        Some(RequestReceipt {
            request,
            identifier,
            download_id,
            receipt_id,
        })
    }

    /// Downloads several images with one shared completion handler, called once per
    /// request.
    pub fn download_multiple<I, F>(
        &self,
        requests: I,
        filter: Option<Arc<dyn ImageFilter>>,
        completion: F,
    ) -> Vec<RequestReceipt>
    where
        I: IntoIterator<Item = ImageRequest>,
        F: Fn(DownloadResponse) + Send + Sync + 'static,
    {
        let completion = Arc::new(completion);
        requests
            .into_iter()
            .filter_map(|request| {
                let completion = completion.clone();
                self.download(request, filter.clone(), move |response| (*completion)(response))
            })
            .collect()
    }

    /// Awaits a download instead of registering a callback.
    pub async fn fetch(
        &self,
        request: ImageRequest,
        filter: Option<Arc<dyn ImageFilter>>,
    ) -> DownloadResponse {
        let (response_tx, response_rx) = oneshot::channel();
        let fallback_request = request.clone();
        self.download(request, filter, move |response| {
            let _ = response_tx.send(response);
        });
        response_rx.await.unwrap_or_else(|_| {
            DownloadResponse::failure(Some(fallback_request), None, DownloadError::Cancelled)
        })
    }

    /// Cancels one registration.
    ///
    /// Its completion receives [`DownloadError::Cancelled`]. Other registrations sharing
    /// the fetch are unaffected; cancelling the last one stops the fetch. Receipts for
    /// downloads that already finished are ignored.
    pub fn cancel_request(&self, receipt: &RequestReceipt) {
        let outcome = self.inner.queue.lock().cancel(
            &receipt.identifier,
            receipt.download_id,
            receipt.receipt_id,
        );

        match outcome {
            CancelOutcome::NotFound => {
                trace!(identifier = %receipt.identifier, "Nothing to cancel");
            }
            CancelOutcome::Removed {
                registration,
                cancel_tx,
            } => {
                if let Some(cancel_tx) = cancel_tx {
                    debug!(identifier = %receipt.identifier, "Cancelling image download");
                    let _ = cancel_tx.send(());
                } else {
                    debug!(identifier = %receipt.identifier, "Cancelled image request");
                }
                self.inner.deliver(
                    registration.completion,
                    DownloadResponse::failure(
                        Some(registration.request),
                        None,
                        DownloadError::Cancelled,
                    ),
                );
            }
        }
    }
}

impl std::fmt::Debug for ImageDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.inner.queue.lock();
        f.debug_struct("ImageDownloader")
            .field("active", &queue.active_count())
            .field("queued", &queue.queued_count())
            .field("pending", &queue.pending_count())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn deliver(&self, completion: Completion, response: DownloadResponse) {
        self.callbacks
            .dispatch(Box::new(move || completion(response)));
    }

    fn start(self: Arc<Self>, ticket: StartTicket) {
        let runtime = self.runtime.clone();
        runtime.spawn(self.run_download(ticket));
    }

    async fn run_download(self: Arc<Self>, ticket: StartTicket) {
        let StartTicket {
            identifier,
            download_id,
            request,
            mut cancel_rx,
        } = ticket;
        debug!(identifier = %identifier, "Starting image download");

        let credential = self.credential.read().clone();
        let fetch = AssertUnwindSafe(self.fetcher.fetch(&request, credential.as_ref()))
            .catch_unwind();
        let outcome = tokio::select! {
            result = fetch => result.unwrap_or_else(|panic_info| {
                let message = panic_message(panic_info.as_ref());
                error!(identifier = %identifier, panic = %message, "Image fetcher panicked");
                Err(DownloadError::transport(format!("fetcher panicked: {message}")))
            }),
            Ok(()) = &mut cancel_rx => Err(DownloadError::Cancelled),
        };

        let registrations = self.queue.lock().finish(&identifier, download_id);

        match outcome {
            Ok(fetched) => {
                self.complete_success(&identifier, fetched, registrations)
                    .await;
            }
            Err(error) => {
                if error.is_cancelled() {
                    debug!(identifier = %identifier, "Image download cancelled");
                } else {
                    warn!(identifier = %identifier, error = %error, "Image download failed");
                }
                self.complete_failure(None, &error, registrations);
            }
        }

        let tickets = {
            let mut queue = self.queue.lock();
            queue.release_slot();
            queue.promote()
        };
        for ticket in tickets {
            self.clone().start(ticket);
        }
    }

    async fn complete_success(
        &self,
        identifier: &str,
        fetched: FetchedResponse,
        registrations: Vec<Registration>,
    ) {
        let metadata = fetched.metadata.clone();

        if self.validate_responses {
            let acceptable = self.acceptable_content_types.read().clone();
            if let Err(error) = validate_response(&metadata, fetched.body.len(), &acceptable) {
                warn!(identifier = %identifier, error = %error, "Rejected image response");
                self.complete_failure(Some(&metadata), &error, registrations);
                return;
            }
        }

        if registrations.is_empty() {
            return;
        }

        let decoder = self.decoder.clone();
        let filters: Vec<Option<Arc<dyn ImageFilter>>> = registrations
            .iter()
            .map(|registration| registration.filter.clone())
            .collect();
        let body = fetched.body;
        let decode_metadata = metadata.clone();

        let processed = tokio::task::spawn_blocking(move || {
            process_image(decoder.as_ref(), &body, &decode_metadata, &filters)
        })
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "Image processing task panicked");
            Err(DecodeError::corrupt(format!("image processing failed: {e}")))
        });

        let images = match processed {
            Ok(images) => images,
            Err(error) => {
                warn!(identifier = %identifier, error = %error, "Failed to decode image");
                self.complete_failure(Some(&metadata), &error.into(), registrations);
                return;
            }
        };

        let mut cached_keys = HashSet::new();
        for (registration, (filter_id, image)) in registrations.into_iter().zip(images) {
            if let Some(cache) = &self.cache {
                let key = image_cache_key(identifier, filter_id.as_deref());
                if cached_keys.insert(key.clone()) {
                    cache.add(image.clone(), &key);
                }
            }

            self.deliver(
                registration.completion,
                DownloadResponse {
                    request: Some(registration.request),
                    response: Some(metadata.clone()),
                    result: Ok(image),
                },
            );
        }

        info!(identifier = %identifier, "Image download completed");
    }

    fn complete_failure(
        &self,
        metadata: Option<&ResponseMetadata>,
        error: &DownloadError,
        registrations: Vec<Registration>,
    ) {
        for registration in registrations {
            self.deliver(
                registration.completion,
                DownloadResponse::failure(
                    Some(registration.request),
                    metadata.cloned(),
                    error.clone(),
                ),
            );
        }
    }
}

fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Checks the status code and content type of a response.
///
/// Empty bodies skip the content-type check so they surface as
/// [`DecodeError::EmptyBody`] instead.
///
/// # Errors
/// Returns a validation error describing the rejection.
pub fn validate_response(
    metadata: &ResponseMetadata,
    body_len: usize,
    acceptable_content_types: &HashSet<String>,
) -> DownloadResult<()> {
    if !(200..300).contains(&metadata.status) {
        return Err(DownloadError::UnacceptableStatusCode {
            code: metadata.status,
        });
    }
    if body_len == 0 {
        return Ok(());
    }

    match metadata.mime_type() {
        None => Err(DownloadError::MissingContentType),
        Some(mime)
            if acceptable_content_types.contains(&mime)
                || acceptable_content_types.contains("*/*") =>
        {
            Ok(())
        }
        Some(mime) => {
            let mut acceptable: Vec<String> = acceptable_content_types.iter().cloned().collect();
            acceptable.sort();
            Err(DownloadError::UnacceptableContentType {
                content_type: mime,
                acceptable,
            })
        }
    }
}

/// Decodes once and applies each registration's filter, running each distinct filter
/// identifier only once. Output is aligned with `filters`.
fn process_image(
    decoder: &dyn ImageDecoder,
    body: &[u8],
    metadata: &ResponseMetadata,
    filters: &[Option<Arc<dyn ImageFilter>>],
) -> Result<Vec<(Option<String>, Image)>, DecodeError> {
    let original = decoder.decode(body, metadata)?;
    let mut filtered: HashMap<String, Image> = HashMap::new();

    Ok(filters
        .iter()
        .map(|filter| match filter {
            None => (None, original.clone()),
            Some(filter) => {
                let filter_id = filter.identifier();
                let image = filtered
                    .entry(filter_id.clone())
                    .or_insert_with(|| filter.apply(&original))
                    .clone();
                (Some(filter_id), image)
            }
        })
        .collect())
}
