//! imgload - Image downloading with request deduplication and an auto-purging cache.
//!
//! This crate shares one fetch between every caller asking for the same image, bounds
//! the number of fetches in flight, decodes and filters images off the callback context,
//! and keeps results in a memory cache that evicts least recently used entries.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing the downloader, cache, fetcher and configuration.
pub mod infrastructure;
/// Presentation layer binding views to downloads.
pub mod presentation;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "imgload";
