mod image_cache_port;
mod image_fetcher_port;
mod image_filter_port;

pub use image_cache_port::{ImageCache, ImageRequestCache};
pub use image_fetcher_port::{FetchedResponse, ImageFetcher};
pub use image_filter_port::{ImageDecoder, ImageFilter};

#[cfg(test)]
pub mod mocks {
    pub use super::image_fetcher_port::mock::{
        MockImageFetcher, png_bytes, png_response,
    };
}
