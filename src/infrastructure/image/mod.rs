//! Image handling infrastructure.
//!
//! This module provides:
//! - An auto-purging memory cache with byte-budget eviction
//! - A download coordinator that shares one fetch between identical requests
//! - Decoding and filters run off the callback context
//! - A reqwest-backed fetcher for HTTP and local files

pub mod callback_queue;
pub mod decoder;
mod download_queue;
pub mod downloader;
pub mod filters;
pub mod http_fetcher;
pub mod memory_cache;
pub mod memory_pressure;

pub use callback_queue::{CallbackContext, CallbackJob, SerialCallbackQueue};
pub use decoder::RasterImageDecoder;
pub use download_queue::QueueOrder;
pub use downloader::{
    DEFAULT_ACCEPTABLE_CONTENT_TYPES, DEFAULT_MAXIMUM_ACTIVE_DOWNLOADS, DownloadResponse,
    DownloaderConfig, ImageDownloader, ImageDownloaderBuilder, RequestReceipt,
    validate_response,
};
pub use filters::{
    AspectScaledToFillSizeFilter, AspectScaledToFitSizeFilter, BlurFilter, CircleFilter,
    CompositeFilter, RoundedCornersFilter, ScaledToSizeFilter,
};
pub use http_fetcher::{DEFAULT_TIMEOUT_SECS, HttpImageFetcher, content_type_for_extension};
pub use memory_cache::{
    AutoPurgingImageCache, CacheStats, DEFAULT_MEMORY_CAPACITY,
    DEFAULT_PREFERRED_MEMORY_USAGE_AFTER_PURGE,
};
pub use memory_pressure::MemoryPressureMonitor;
