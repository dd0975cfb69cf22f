use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::transform::SimilarityTransform;
use crate::types::{BoundingBox, Point, Shape};

/// Trait for accessing pixel intensities from an image.
pub trait ImageAccess {
    /// Grayscale intensity at (x, y); 0 for out-of-bounds pixels.
    fn get_pixel(&self, x: i32, y: i32) -> u8;

    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

impl ImageAccess for GrayImage {
    fn get_pixel(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x as u32 >= self.width() || y as u32 >= self.height() {
            return 0;
        }
        self.get_pixel(x as u32, y as u32)[0]
    }

    fn width(&self) -> u32 {
        GrayImage::width(self)
    }

    fn height(&self) -> u32 {
        GrayImage::height(self)
    }
}

/// A sampling location used by one cascade stage: a landmark to anchor on
/// and an offset from it, both in the normalized face frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeaturePixel {
    pub anchor: u16,
    pub offset: Point,
}

/// Intensity of the pixel nearest to `p`.
#[inline]
pub fn nearest_intensity<I: ImageAccess>(image: &I, p: Point) -> f32 {
    let x = (p.x + 0.5).floor() as i32;
    let y = (p.y + 0.5).floor() as i32;
    image.get_pixel(x, y) as f32
}

/// Sample every feature pixel of a stage.
///
/// `shape` is the current estimate in the normalized face frame and
/// `mean_to_shape` the similarity from the mean shape to it; offsets are
/// rotated and scaled by it so features follow the face's pose.
pub fn extract_feature_pixels<I: ImageAccess>(
    features: &[FeaturePixel],
    mean_to_shape: &SimilarityTransform,
    shape: &Shape,
    face: &BoundingBox,
    image: &I,
) -> Vec<f32> {
    features
        .iter()
        .map(|f| {
            let normalized = shape[f.anchor as usize] + mean_to_shape.apply_linear(f.offset);
            nearest_intensity(image, face.denormalize_point(normalized))
        })
        .collect()
}
