//! Domain error types.

mod download_error;

pub use download_error::{DecodeError, DownloadError, DownloadResult};
