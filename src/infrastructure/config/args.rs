//! Command-line arguments.

use super::app_config::{FilterKind, LogLevel};
use crate::infrastructure::image::QueueOrder;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments. Every option overrides the config file.
#[derive(Debug, Parser)]
#[command(
    name = "imgload",
    version,
    about = "Download images concurrently, deduplicated and cached",
    long_about = None
)]
pub struct CliArgs {
    /// Image URLs (`http://`, `https://` or `file://`).
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<String>,

    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Directory to write images to.
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum simultaneous downloads.
    #[arg(short = 'j', long, value_name = "N")]
    pub max_active: Option<usize>,

    /// Start order for queued downloads.
    #[arg(long, value_enum)]
    pub queue_order: Option<QueueOrder>,

    /// Validate status codes and content types.
    #[arg(long)]
    pub validate: Option<bool>,

    /// Additional acceptable MIME type. May be repeated.
    #[arg(long = "accept-content-type", value_name = "MIME")]
    pub accept_content_types: Vec<String>,

    /// Request timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Scale assigned to decoded images.
    #[arg(long)]
    pub scale: Option<f32>,

    /// Bypass the memory cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Filter applied to every image.
    #[arg(long, value_enum)]
    pub filter: Option<FilterKind>,

    /// Filter target width in points.
    #[arg(long)]
    pub width: Option<f32>,

    /// Filter target height in points.
    #[arg(long)]
    pub height: Option<f32>,

    /// Corner radius in points.
    #[arg(long)]
    pub radius: Option<f32>,

    /// Blur sigma.
    #[arg(long)]
    pub sigma: Option<f32>,

    /// Basic-auth username.
    #[arg(long, env = "IMGLOAD_USERNAME")]
    pub username: Option<String>,

    /// Basic-auth password.
    #[arg(long, env = "IMGLOAD_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}
