//! Domain entity definitions.

mod image;

pub use image::{
    CachePolicy, Credential, Image, ImageRequest, ResponseMetadata, image_cache_key,
};
