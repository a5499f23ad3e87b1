//! Application configuration.

/// `config.toml` schema.
pub mod app_config;
/// Command-line arguments.
pub mod args;
/// Config file storage.
pub mod storage;

pub use app_config::{
    AppConfig, CacheConfig, DownloaderSettings, FilterConfig, FilterKind, LogLevel,
};
pub use args::CliArgs;
pub use storage::{ConfigError, StorageManager};
