//! Raster decoding on top of the `image` crate.

use tracing::trace;

use crate::domain::entities::{Image, ResponseMetadata};
use crate::domain::errors::DecodeError;
use crate::domain::ports::ImageDecoder;

/// Decodes PNG/JPEG/WebP/GIF/BMP bodies into images at a fixed display scale.
#[derive(Debug, Clone, Copy)]
pub struct RasterImageDecoder {
    scale: f32,
}

impl RasterImageDecoder {
    /// Creates a decoder assigning `scale` to every image.
    #[must_use]
    pub const fn new(scale: f32) -> Self {
        Self { scale }
    }
}

impl Default for RasterImageDecoder {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ImageDecoder for RasterImageDecoder {
    fn decode(&self, body: &[u8], metadata: &ResponseMetadata) -> Result<Image, DecodeError> {
        if body.is_empty() {
            return Err(DecodeError::EmptyBody);
        }

        let bitmap = image::load_from_memory(body)
            .map_err(|e| DecodeError::corrupt(format!("{}: {e}", metadata.url)))?;

        trace!(
            url = %metadata.url,
            width = bitmap.width(),
            height = bitmap.height(),
            "Decoded image"
        );

        Ok(Image::new(bitmap, self.scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::png_bytes;

    fn metadata() -> ResponseMetadata {
        ResponseMetadata {
            url: "https://example.com/a.png".to_string(),
            status: 200,
            content_type: Some("image/png".to_string()),
            content_length: 0,
        }
    }

    #[test]
    fn test_decodes_png_at_scale() {
        let decoder = RasterImageDecoder::new(2.0);
        let image = decoder.decode(&png_bytes(8, 6), &metadata()).unwrap();

        assert_eq!(image.pixel_width(), 8);
        assert_eq!(image.pixel_height(), 6);
        assert_eq!(image.size(), (4.0, 3.0));
    }

    #[test]
    fn test_empty_body_is_distinct_from_corrupt() {
        let decoder = RasterImageDecoder::default();

        assert_eq!(decoder.decode(&[], &metadata()), Err(DecodeError::EmptyBody));
        assert!(matches!(
            decoder.decode(b"definitely not an image", &metadata()),
            Err(DecodeError::Corrupt { .. })
        ));
    }
}
