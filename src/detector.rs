//! Capabilities the alignment pipeline depends on.
//!
//! Detection and landmark regression are injected through these traits so
//! callers can swap in any implementation. [`SeetaDetector`] adapts the
//! SeetaFace frontal detector from `rustface`; [`ShapePredictor`] provides
//! landmarks.

use std::path::Path;

use image::GrayImage;
use rustface::ImageData;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::ShapePredictor;
use crate::types::{BoundingBox, Shape};

/// Finds faces in a grayscale image.
pub trait FaceDetector {
    /// Face boxes, best first. An empty vector means no face was found.
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>>;
}

/// Locates landmarks for one face.
pub trait LandmarkPredictor {
    fn predict(&self, image: &GrayImage, face: &BoundingBox) -> Result<Shape>;
}

impl<T: FaceDetector + ?Sized> FaceDetector for Box<T> {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>> {
        (**self).detect(image)
    }
}

impl<T: LandmarkPredictor + ?Sized> LandmarkPredictor for Box<T> {
    fn predict(&self, image: &GrayImage, face: &BoundingBox) -> Result<Shape> {
        (**self).predict(image, face)
    }
}

impl LandmarkPredictor for ShapePredictor {
    fn predict(&self, image: &GrayImage, face: &BoundingBox) -> Result<Shape> {
        ShapePredictor::predict(self, image, face)
    }
}

/// Tuning knobs of the SeetaFace detector.
#[derive(Debug, Clone, Copy)]
pub struct SeetaSettings {
    pub min_face_size: u32,
    pub score_thresh: f64,
    pub pyramid_scale_factor: f32,
    pub window_step: u32,
}

impl Default for SeetaSettings {
    fn default() -> Self {
        Self {
            min_face_size: 20,
            score_thresh: 2.0,
            pyramid_scale_factor: 0.8,
            window_step: 4,
        }
    }
}

/// [`FaceDetector`] backed by `rustface`.
pub struct SeetaDetector {
    inner: Box<dyn rustface::Detector>,
}

impl SeetaDetector {
    /// Load a `seeta_fd_frontal_v1.0.bin` model.
    pub fn load<P: AsRef<Path>>(path: P, settings: SeetaSettings) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| Error::Detector(format!("invalid model path {:?}", path)))?;
        let mut inner = rustface::create_detector(path_str)
            .map_err(|e| Error::Detector(format!("failed to load face detector: {}", e)))?;

        inner.set_min_face_size(settings.min_face_size);
        inner.set_score_thresh(settings.score_thresh);
        inner.set_pyramid_scale_factor(settings.pyramid_scale_factor);
        inner.set_slide_window_step(settings.window_step, settings.window_step);

        Ok(Self { inner })
    }
}

impl FaceDetector for SeetaDetector {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>> {
        let (width, height) = image.dimensions();
        let data = ImageData::new(image.as_raw(), width, height);

        let mut faces = self.inner.detect(&data);
        faces.sort_by(|a, b| b.score().total_cmp(&a.score()));
        debug!(faces = faces.len(), "face detection finished");

        Ok(faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                pixel_box(bbox.x(), bbox.y(), bbox.width(), bbox.height())
            })
            .collect())
    }
}

/// A `width` x `height` pixel block as a landmark box.
///
/// Landmark models span the box from its first to its last pixel centre, so
/// the box runs from `(x, y)` to `(x + width - 1, y + height - 1)`.
fn pixel_box(x: i32, y: i32, width: u32, height: u32) -> BoundingBox {
    let (left, top) = (x as f32, y as f32);
    BoundingBox::from_corners(
        left,
        top,
        left + width.saturating_sub(1) as f32,
        top + height.saturating_sub(1) as f32,
    )
}
