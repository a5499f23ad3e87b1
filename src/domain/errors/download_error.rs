//! Image download error types.

use thiserror::Error;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Reasons a response body could not be turned into an image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("response body is empty")]
    EmptyBody,

    #[error("image data is corrupt or unsupported: {message}")]
    Corrupt { message: String },
}

impl DecodeError {
    /// Creates corrupt-data error.
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}

/// Errors delivered to download completion handlers.
///
/// Cloneable because a single failed fetch is reported to every registered caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum DownloadError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("response status code {code} was unacceptable")]
    UnacceptableStatusCode { code: u16 },

    #[error("response content type {content_type:?} was unacceptable, expected one of {acceptable:?}")]
    UnacceptableContentType {
        content_type: String,
        acceptable: Vec<String>,
    },

    #[error("response is missing a content type")]
    MissingContentType,

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("request was cancelled")]
    Cancelled,

    #[error("image is not cached and the cache policy forbids loading")]
    NotCached,

    #[error("invalid configuration: {message}")]
    Configuration { message: String },
}

impl DownloadError {
    /// Creates invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns true if the registration was cancelled rather than failed.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true for status and content-type rejections.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnacceptableStatusCode { .. }
                | Self::UnacceptableContentType { .. }
                | Self::MissingContentType
        )
    }
}
