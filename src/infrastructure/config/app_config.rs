//! Application configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use super::args::CliArgs;
use crate::domain::entities::Credential;
use crate::domain::ports::ImageFilter;
use crate::infrastructure::image::{
    AspectScaledToFillSizeFilter, AspectScaledToFitSizeFilter, BlurFilter, CircleFilter,
    DEFAULT_MAXIMUM_ACTIVE_DOWNLOADS, DEFAULT_MEMORY_CAPACITY,
    DEFAULT_PREFERRED_MEMORY_USAGE_AFTER_PURGE, DEFAULT_TIMEOUT_SECS, DownloaderConfig,
    QueueOrder, RoundedCornersFilter, ScaledToSizeFilter,
};

const APP_NAME: &str = "imgload";
const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration, read from `config.toml` and overridden by CLI flags.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory downloaded images are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Download settings.
    #[serde(default)]
    pub downloader: DownloaderSettings,

    /// Memory cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Filter applied to every download.
    #[serde(default)]
    pub filter: FilterConfig,

    /// Basic-auth credential. Never read from or written to the config file.
    #[serde(skip)]
    pub credential: Option<Credential>,
}

/// Download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderSettings {
    /// Maximum simultaneous fetches.
    #[serde(default = "default_maximum_active_downloads")]
    pub maximum_active_downloads: usize,

    /// Start order for queued downloads.
    #[serde(default)]
    pub queue_order: QueueOrder,

    /// Reject non-2xx responses and unexpected content types.
    #[serde(default = "default_true")]
    pub validate_responses: bool,

    /// MIME types accepted on top of the built-in image types.
    #[serde(default)]
    pub extra_content_types: Vec<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Scale assigned to decoded images.
    #[serde(default = "default_image_scale")]
    pub image_scale: f32,
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            maximum_active_downloads: default_maximum_active_downloads(),
            queue_order: QueueOrder::default(),
            validate_responses: true,
            extra_content_types: Vec::new(),
            timeout_secs: default_timeout_secs(),
            image_scale: default_image_scale(),
        }
    }
}

impl DownloaderSettings {
    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Builds the downloader configuration.
    #[must_use]
    pub fn to_downloader_config(&self, credential: Option<Credential>) -> DownloaderConfig {
        let mut config = DownloaderConfig {
            maximum_active_downloads: self.maximum_active_downloads,
            queue_order: self.queue_order,
            validate_responses: self.validate_responses,
            credential,
            ..DownloaderConfig::default()
        };
        config.acceptable_content_types.extend(
            self.extra_content_types
                .iter()
                .map(|ct| ct.to_ascii_lowercase()),
        );
        config
    }
}

/// Memory cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Disable to always fetch.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bytes at which a purge is triggered.
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: u64,

    /// Bytes a purge brings usage down to.
    #[serde(default = "default_preferred_memory_usage_after_purge")]
    pub preferred_memory_usage_after_purge: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            preferred_memory_usage_after_purge: DEFAULT_PREFERRED_MEMORY_USAGE_AFTER_PURGE,
        }
    }
}

/// Built-in filter kinds selectable from config or CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Exact size, aspect ratio ignored.
    ScaledToSize,
    /// Fit inside the size, padded with transparency.
    AspectFit,
    /// Cover the size, overflow cropped.
    AspectFill,
    /// Rounded corners.
    RoundedCorners,
    /// Centered circle.
    Circle,
    /// Gaussian blur.
    Blur,
}

/// Filter applied to every download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Filter to apply. `None` delivers images unfiltered.
    #[serde(default)]
    pub kind: Option<FilterKind>,

    /// Target width in points for sizing filters.
    #[serde(default = "default_filter_dimension")]
    pub width: f32,

    /// Target height in points for sizing filters.
    #[serde(default = "default_filter_dimension")]
    pub height: f32,

    /// Corner radius in points.
    #[serde(default = "default_radius")]
    pub radius: f32,

    /// Blur sigma.
    #[serde(default = "default_sigma")]
    pub sigma: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            kind: None,
            width: default_filter_dimension(),
            height: default_filter_dimension(),
            radius: default_radius(),
            sigma: default_sigma(),
        }
    }
}

impl FilterConfig {
    /// Instantiates the configured filter.
    #[must_use]
    pub fn build(&self) -> Option<Arc<dyn ImageFilter>> {
        let filter: Arc<dyn ImageFilter> = match self.kind? {
            FilterKind::ScaledToSize => Arc::new(ScaledToSizeFilter::new(self.width, self.height)),
            FilterKind::AspectFit => {
                Arc::new(AspectScaledToFitSizeFilter::new(self.width, self.height))
            }
            FilterKind::AspectFill => {
                Arc::new(AspectScaledToFillSizeFilter::new(self.width, self.height))
            }
            FilterKind::RoundedCorners => Arc::new(RoundedCornersFilter::new(self.radius)),
            FilterKind::Circle => Arc::new(CircleFilter),
            FilterKind::Blur => Arc::new(BlurFilter::new(self.sigma)),
        };
        Some(filter)
    }
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("images")
}

const fn default_maximum_active_downloads() -> usize {
    DEFAULT_MAXIMUM_ACTIVE_DOWNLOADS
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_image_scale() -> f32 {
    1.0
}

const fn default_memory_capacity() -> u64 {
    DEFAULT_MEMORY_CAPACITY
}

const fn default_preferred_memory_usage_after_purge() -> u64 {
    DEFAULT_PREFERRED_MEMORY_USAGE_AFTER_PURGE
}

const fn default_filter_dimension() -> f32 {
    100.0
}

const fn default_radius() -> f32 {
    8.0
}

const fn default_sigma() -> f32 {
    2.0
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: CliArgs) {
        if let Some(config_path) = args.config {
            self.config = Some(config_path);
        }
        if let Some(log_path) = args.log_path {
            self.log_path = Some(log_path);
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(output_dir) = args.output_dir {
            self.output_dir = output_dir;
        }
        if let Some(max_active) = args.max_active {
            self.downloader.maximum_active_downloads = max_active;
        }
        if let Some(queue_order) = args.queue_order {
            self.downloader.queue_order = queue_order;
        }
        if let Some(validate) = args.validate {
            self.downloader.validate_responses = validate;
        }
        if let Some(timeout) = args.timeout {
            self.downloader.timeout_secs = timeout;
        }
        if let Some(scale) = args.scale {
            self.downloader.image_scale = scale;
        }
        self.downloader
            .extra_content_types
            .extend(args.accept_content_types);
        if args.no_cache {
            self.cache.enabled = false;
        }
        if let Some(kind) = args.filter {
            self.filter.kind = Some(kind);
        }
        if let Some(width) = args.width {
            self.filter.width = width;
        }
        if let Some(height) = args.height {
            self.filter.height = height;
        }
        if let Some(radius) = args.radius {
            self.filter.radius = radius;
        }
        if let Some(sigma) = args.sigma {
            self.filter.sigma = sigma;
        }
        if let Some(username) = args.username {
            self.credential = Some(Credential::new(username, args.password));
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("imgload.log"))
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config: None,
            log_path: None,
            log_level: LogLevel::Info,
            output_dir: default_output_dir(),
            downloader: DownloaderSettings::default(),
            cache: CacheConfig::default(),
            filter: FilterConfig::default(),
            credential: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
            log_level = "debug"
            output_dir = "/tmp/out"

            [downloader]
            maximum_active_downloads = 8
            queue_order = "lifo"
            extra_content_types = ["binary/octet-stream"]

            [cache]
            memory_capacity = 1000
            preferred_memory_usage_after_purge = 600

            [filter]
            kind = "rounded_corners"
            radius = 4.0
        "#;

        let config: AppConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.downloader.maximum_active_downloads, 8);
        assert_eq!(config.downloader.queue_order, QueueOrder::Lifo);
        assert!(config.downloader.validate_responses); // default_true
        assert_eq!(config.downloader.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.cache.memory_capacity, 1000);
        assert!(config.cache.enabled);
        assert_eq!(config.filter.kind, Some(FilterKind::RoundedCorners));
        assert_eq!(
            config.filter.build().map(|f| f.identifier()),
            Some("rounded_corners-radius:4-divided:false".to_string())
        );
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.downloader.maximum_active_downloads, 4);
        assert_eq!(config.cache.memory_capacity, DEFAULT_MEMORY_CAPACITY);
        assert!(config.filter.build().is_none());
        assert!(config.credential.is_none());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config: AppConfig = toml::from_str(
            r#"
            [downloader]
            maximum_active_downloads = 8
            "#,
        )
        .unwrap();

        let args = CliArgs::parse_from([
            "imgload",
            "-j",
            "2",
            "--filter",
            "circle",
            "--no-cache",
            "--accept-content-type",
            "binary/octet-stream",
            "--username",
            "alice",
            "https://example.com/a.png",
        ]);
        config.merge_with_args(args);

        assert_eq!(config.downloader.maximum_active_downloads, 2);
        assert!(!config.cache.enabled);
        assert_eq!(config.filter.build().map(|f| f.identifier()), Some("circle".to_string()));
        assert_eq!(config.credential.map(|c| c.username), Some("alice".to_string()));

        let downloader = config.downloader.to_downloader_config(None);
        assert!(downloader.acceptable_content_types.contains("binary/octet-stream"));
        assert!(downloader.acceptable_content_types.contains("image/png"));
    }
}
