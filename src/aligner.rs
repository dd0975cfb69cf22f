//! Landmark-to-template alignment.
//!
//! The aligner is stateless apart from its immutable [`AlignmentTemplate`]:
//! select the template's landmarks, fit a similarity transform onto the
//! scaled template points, and resample the image through its inverse.

use image::{DynamicImage, ImageBuffer, Pixel};
use tracing::debug;

use crate::error::{Error, Result};
use crate::template::AlignmentTemplate;
use crate::transform::{fit_similarity, SimilarityFit};
use crate::types::{Point, Shape};
use crate::warp::{warp, warp_dynamic, Channel};

#[derive(Debug, Clone)]
pub struct Aligner {
    template: AlignmentTemplate,
    targets: Vec<Point>,
}

impl Aligner {
    /// Create an aligner for a custom template.
    pub fn new(template: AlignmentTemplate) -> Result<Self> {
        template.validate()?;
        let targets = template.target_points();
        Ok(Self { template, targets })
    }

    /// The canonical 9-point, 300x300, cubic aligner.
    pub fn canonical() -> Self {
        let template = AlignmentTemplate::canonical();
        let targets = template.target_points();
        Self { template, targets }
    }

    pub fn template(&self) -> &AlignmentTemplate {
        &self.template
    }

    /// Template points in output pixel coordinates.
    pub fn target_points(&self) -> &[Point] {
        &self.targets
    }

    pub fn select_landmarks(&self, landmarks: &Shape) -> Result<Vec<Point>> {
        self.template.select(landmarks)
    }

    /// Fit the transform taking the selected landmarks onto the template.
    pub fn fit(&self, landmarks: &Shape) -> Result<SimilarityFit> {
        let selected = self.select_landmarks(landmarks)?;
        let fit = fit_similarity(&selected, &self.targets)?;
        debug!(
            scale = fit.transform.scale(),
            rotation = fit.transform.rotation(),
            "fitted alignment transform"
        );
        Ok(fit)
    }

    /// Align a decoded image, keeping its pixel format.
    pub fn align(&self, image: &DynamicImage, landmarks: &Shape) -> Result<DynamicImage> {
        check_area(image.width(), image.height())?;
        let fit = self.fit(landmarks)?;
        warp_dynamic(
            image,
            &fit.inverse,
            self.template.output_size(),
            self.template.interpolation,
            self.template.boundary,
        )
    }

    /// Align a typed image buffer.
    pub fn align_buffer<P>(
        &self,
        image: &ImageBuffer<P, Vec<P::Subpixel>>,
        landmarks: &Shape,
    ) -> Result<ImageBuffer<P, Vec<P::Subpixel>>>
    where
        P: Pixel,
        P::Subpixel: Channel,
    {
        let (w, h) = image.dimensions();
        check_area(w, h)?;
        let fit = self.fit(landmarks)?;
        warp(
            image,
            &fit.inverse,
            self.template.output_size(),
            self.template.interpolation,
            self.template.boundary,
        )
    }
}

impl Default for Aligner {
    fn default() -> Self {
        Self::canonical()
    }
}

fn check_area(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidImage(format!(
            "image has zero area ({}x{})",
            width, height
        )));
    }
    Ok(())
}

/// Select the 9 canonical landmarks from a 68-point set.
pub fn select_landmarks(landmarks: &Shape) -> Result<Vec<Point>> {
    AlignmentTemplate::canonical().select(landmarks)
}

/// Align `image` onto the canonical template using its 68 landmarks.
pub fn align(image: &DynamicImage, landmarks: &Shape) -> Result<DynamicImage> {
    Aligner::canonical().align(image, landmarks)
}
