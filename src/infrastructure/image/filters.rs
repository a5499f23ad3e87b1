//! Built-in image filters.
//!
//! Sizes are in points; filters multiply by the image scale to get pixel sizes, so a
//! 2x image scaled to 100x100 points ends up 200x200 pixels.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};

use crate::domain::entities::Image;
use crate::domain::ports::ImageFilter;

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_pixels(points: f32, scale: f32) -> u32 {
    ((points * scale).round() as u32).max(1)
}

/// Scales to an exact size, ignoring aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledToSizeFilter {
    /// Target width in points.
    pub width: f32,
    /// Target height in points.
    pub height: f32,
}

impl ScaledToSizeFilter {
    /// Creates the filter.
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl ImageFilter for ScaledToSizeFilter {
    fn identifier(&self) -> String {
        format!("scaled_to_size-{}x{}", self.width, self.height)
    }

    fn apply(&self, image: &Image) -> Image {
        let width = to_pixels(self.width, image.scale());
        let height = to_pixels(self.height, image.scale());
        image.with_bitmap(image.bitmap().resize_exact(width, height, FilterType::Triangle))
    }
}

/// Scales to fit inside a size, centering the result on a transparent canvas of
/// exactly that size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectScaledToFitSizeFilter {
    /// Target width in points.
    pub width: f32,
    /// Target height in points.
    pub height: f32,
}

impl AspectScaledToFitSizeFilter {
    /// Creates the filter.
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl ImageFilter for AspectScaledToFitSizeFilter {
    fn identifier(&self) -> String {
        format!("aspect_scaled_to_fit-{}x{}", self.width, self.height)
    }

    fn apply(&self, image: &Image) -> Image {
        let width = to_pixels(self.width, image.scale());
        let height = to_pixels(self.height, image.scale());
        let fitted = image.bitmap().resize(width, height, FilterType::Triangle);

        let mut canvas = RgbaImage::new(width, height);
        let x = i64::from((width - fitted.width()) / 2);
        let y = i64::from((height - fitted.height()) / 2);
        imageops::overlay(&mut canvas, &fitted.to_rgba8(), x, y);
        image.with_bitmap(DynamicImage::ImageRgba8(canvas))
    }
}

/// Scales to cover a size, cropping the overflow around the center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectScaledToFillSizeFilter {
    /// Target width in points.
    pub width: f32,
    /// Target height in points.
    pub height: f32,
}

impl AspectScaledToFillSizeFilter {
    /// Creates the filter.
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl ImageFilter for AspectScaledToFillSizeFilter {
    fn identifier(&self) -> String {
        format!("aspect_scaled_to_fill-{}x{}", self.width, self.height)
    }

    fn apply(&self, image: &Image) -> Image {
        let width = to_pixels(self.width, image.scale());
        let height = to_pixels(self.height, image.scale());
        image.with_bitmap(image.bitmap().resize_to_fill(width, height, FilterType::Triangle))
    }
}

#[allow(clippy::cast_precision_loss)]
fn mask_corners(bitmap: &mut RgbaImage, radius: f32) {
    let (width, height) = bitmap.dimensions();
    let (w, h) = (width as f32, height as f32);
    let radius = radius.min(w.min(h) / 2.0);
    if radius <= 0.0 {
        return;
    }

    for (x, y, pixel) in bitmap.enumerate_pixels_mut() {
        let px = x as f32 + 0.5;
        let py = y as f32 + 0.5;
        let cx = if px < radius {
            radius
        } else if px > w - radius {
            w - radius
        } else {
            continue;
        };
        let cy = if py < radius {
            radius
        } else if py > h - radius {
            h - radius
        } else {
            continue;
        };
        if (px - cx).powi(2) + (py - cy).powi(2) > radius.powi(2) {
            pixel.0[3] = 0;
        }
    }
}

/// Makes the corners transparent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundedCornersFilter {
    /// Corner radius in points.
    pub radius: f32,
    /// Treat the radius as pixels rather than points.
    pub divide_radius_by_image_scale: bool,
}

impl RoundedCornersFilter {
    /// Creates the filter with the radius in points.
    #[must_use]
    pub const fn new(radius: f32) -> Self {
        Self {
            radius,
            divide_radius_by_image_scale: false,
        }
    }
}

impl ImageFilter for RoundedCornersFilter {
    fn identifier(&self) -> String {
        format!(
            "rounded_corners-radius:{}-divided:{}",
            self.radius, self.divide_radius_by_image_scale
        )
    }

    fn apply(&self, image: &Image) -> Image {
        let radius = if self.divide_radius_by_image_scale {
            self.radius
        } else {
            self.radius * image.scale()
        };
        let mut bitmap = image.bitmap().to_rgba8();
        mask_corners(&mut bitmap, radius);
        image.with_bitmap(DynamicImage::ImageRgba8(bitmap))
    }
}

/// Crops to the centered square and masks it to a circle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircleFilter;

impl ImageFilter for CircleFilter {
    fn identifier(&self) -> String {
        "circle".to_string()
    }

    #[allow(clippy::cast_precision_loss)]
    fn apply(&self, image: &Image) -> Image {
        let bitmap = image.bitmap();
        let side = bitmap.width().min(bitmap.height());
        let x = (bitmap.width() - side) / 2;
        let y = (bitmap.height() - side) / 2;

        let mut square = bitmap.crop_imm(x, y, side, side).to_rgba8();
        mask_corners(&mut square, side as f32 / 2.0);
        image.with_bitmap(DynamicImage::ImageRgba8(square))
    }
}

/// Gaussian blur.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurFilter {
    /// Standard deviation of the Gaussian kernel, in pixels.
    pub sigma: f32,
}

impl BlurFilter {
    /// Creates the filter.
    #[must_use]
    pub const fn new(sigma: f32) -> Self {
        Self { sigma }
    }
}

impl ImageFilter for BlurFilter {
    fn identifier(&self) -> String {
        format!("blur-{}", self.sigma)
    }

    fn apply(&self, image: &Image) -> Image {
        image.with_bitmap(image.bitmap().blur(self.sigma))
    }
}

/// Applies several filters in order.
#[derive(Clone, Default)]
pub struct CompositeFilter {
    filters: Vec<Arc<dyn ImageFilter>>,
}

impl CompositeFilter {
    /// Chains `filters`, applied first to last.
    #[must_use]
    pub fn new(filters: Vec<Arc<dyn ImageFilter>>) -> Self {
        Self { filters }
    }

    /// Appends a filter.
    #[must_use]
    pub fn then(mut self, filter: impl ImageFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Number of chained filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// True if no filters are chained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl ImageFilter for CompositeFilter {
    fn identifier(&self) -> String {
        self.filters
            .iter()
            .map(|filter| filter.identifier())
            .collect::<Vec<_>>()
            .join("_")
    }

    fn apply(&self, image: &Image) -> Image {
        self.filters
            .iter()
            .fold(image.clone(), |current, filter| filter.apply(&current))
    }
}

impl std::fmt::Debug for CompositeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CompositeFilter")
            .field(&self.identifier())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba};

    fn opaque(width: u32, height: u32, scale: f32) -> Image {
        let bitmap = RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255]));
        Image::new(DynamicImage::ImageRgba8(bitmap), scale)
    }

    #[test]
    fn test_scaled_to_size_uses_image_scale() {
        let output = ScaledToSizeFilter::new(10.0, 5.0).apply(&opaque(40, 40, 2.0));
        assert_eq!((output.pixel_width(), output.pixel_height()), (20, 10));
        assert!((output.scale() - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_aspect_fit_pads_to_exact_size() {
        let output = AspectScaledToFitSizeFilter::new(20.0, 20.0).apply(&opaque(40, 20, 1.0));
        assert_eq!((output.pixel_width(), output.pixel_height()), (20, 20));
        assert_eq!(output.bitmap().get_pixel(10, 0).0[3], 0);
        assert_eq!(output.bitmap().get_pixel(10, 10).0[3], 255);
    }

    #[test]
    fn test_aspect_fill_crops_to_exact_size() {
        let output = AspectScaledToFillSizeFilter::new(20.0, 20.0).apply(&opaque(40, 20, 1.0));
        assert_eq!((output.pixel_width(), output.pixel_height()), (20, 20));
    }

    #[test]
    fn test_rounded_corners_clears_corner_alpha() {
        let output = RoundedCornersFilter::new(5.0).apply(&opaque(20, 20, 1.0));
        assert_eq!(output.bitmap().get_pixel(0, 0).0[3], 0);
        assert_eq!(output.bitmap().get_pixel(19, 19).0[3], 0);
        assert_eq!(output.bitmap().get_pixel(10, 10).0[3], 255);
        assert_eq!(output.bitmap().get_pixel(10, 0).0[3], 255);
    }

    #[test]
    fn test_circle_is_square() {
        let output = CircleFilter.apply(&opaque(30, 20, 1.0));
        assert_eq!((output.pixel_width(), output.pixel_height()), (20, 20));
        assert_eq!(output.bitmap().get_pixel(0, 0).0[3], 0);
        assert_eq!(output.bitmap().get_pixel(10, 10).0[3], 255);
    }

    #[test]
    fn test_blur_keeps_dimensions() {
        let output = BlurFilter::new(2.0).apply(&opaque(12, 8, 1.0));
        assert_eq!((output.pixel_width(), output.pixel_height()), (12, 8));
    }

    #[test]
    fn test_composite_applies_in_order() {
        let filter = CompositeFilter::default()
            .then(ScaledToSizeFilter::new(10.0, 10.0))
            .then(RoundedCornersFilter::new(2.0));

        assert_eq!(filter.len(), 2);
        assert_eq!(
            filter.identifier(),
            "scaled_to_size-10x10_rounded_corners-radius:2-divided:false"
        );

        let output = filter.apply(&opaque(50, 30, 1.0));
        assert_eq!((output.pixel_width(), output.pixel_height()), (10, 10));
        assert_eq!(output.bitmap().get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn test_identifiers_distinguish_parameters() {
        assert_ne!(
            BlurFilter::new(1.0).identifier(),
            BlurFilter::new(2.0).identifier()
        );
        assert_eq!(
            ScaledToSizeFilter::new(1.0, 2.0).identifier(),
            ScaledToSizeFilter::new(1.0, 2.0).identifier()
        );
    }
}
