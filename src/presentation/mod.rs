//! Presentation layer binding displayed images to downloads.

/// Image view slot.
pub mod image_view;

pub use image_view::{ImageView, ImageViewStatus};
