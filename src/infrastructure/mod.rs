//! Infrastructure layer with adapters for the network, the cache and configuration.

/// Application configuration.
pub mod config;
/// Image handling (downloading, caching, filtering).
pub mod image;

pub use config::{AppConfig, CacheConfig, CliArgs, DownloaderSettings, LogLevel, StorageManager};
pub use image::{
    AutoPurgingImageCache, CacheStats, DownloadResponse, DownloaderConfig, HttpImageFetcher,
    ImageDownloader, MemoryPressureMonitor, QueueOrder, RasterImageDecoder, RequestReceipt,
};
