//! Canonical alignment geometry.
//!
//! [`AlignmentTemplate`] bundles every constant the aligner depends on: the
//! nine target points, their scale factor, which landmarks feed them, and the
//! output raster. Landmark indices are 1-based and correspond one-to-one, in
//! order, to the template points. Reordering one list without the other
//! silently produces a wrong fit, so keep them together.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Point, Shape};
use crate::warp::{Boundary, Interpolation};

/// Canonical template x coordinates, before scaling.
pub const TEMPLATE_X: [f32; 9] = [
    25.0347, 34.1802, 44.1943, 53.4623, 34.1208, 39.3564, 44.9156, 31.1454, 47.8747,
];

/// Canonical template y coordinates, before scaling.
pub const TEMPLATE_Y: [f32; 9] = [
    34.1580, 34.1659, 34.0936, 33.8063, 45.4179, 47.0043, 45.3628, 53.0275, 52.7999,
];

pub const TEMPLATE_SCALE: f32 = 3.5;

/// 1-based iBUG landmark numbers: eye corners (37, 40, 43, 46), nostril
/// wings and nose tip (32, 34, 36), mouth corners (49, 55).
pub const LANDMARK_NUMBERS: [usize; 9] = [37, 40, 43, 46, 32, 34, 36, 49, 55];

pub const REQUIRED_LANDMARKS: usize = 68;

pub const OUTPUT_SIZE: (u32, u32) = (300, 300);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentTemplate {
    /// Target points in the normalized template frame.
    pub points: Vec<Point>,
    /// Factor applied to `points` to get output pixel coordinates.
    pub scale: f32,
    /// 1-based landmark numbers, paired in order with `points`.
    pub landmark_numbers: Vec<usize>,
    /// Minimum size of an accepted landmark set.
    pub required_landmarks: usize,
    pub output_width: u32,
    pub output_height: u32,
    pub interpolation: Interpolation,
    pub boundary: Boundary,
}

impl AlignmentTemplate {
    pub fn canonical() -> Self {
        Self {
            points: TEMPLATE_X
                .iter()
                .zip(TEMPLATE_Y.iter())
                .map(|(&x, &y)| Point::new(x, y))
                .collect(),
            scale: TEMPLATE_SCALE,
            landmark_numbers: LANDMARK_NUMBERS.to_vec(),
            required_landmarks: REQUIRED_LANDMARKS,
            output_width: OUTPUT_SIZE.0,
            output_height: OUTPUT_SIZE.1,
            interpolation: Interpolation::Bicubic,
            boundary: Boundary::Constant(0.0),
        }
    }

    /// Read a template from a JSON file. Missing fields take canonical values.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let template: Self = serde_json::from_str(text)?;
        template.validate()?;
        Ok(template)
    }

    pub fn validate(&self) -> Result<()> {
        if self.points.len() != self.landmark_numbers.len() {
            return Err(Error::InvalidTemplate(format!(
                "{} template points but {} landmark numbers",
                self.points.len(),
                self.landmark_numbers.len()
            )));
        }
        if self.points.len() < 2 {
            return Err(Error::InvalidTemplate(
                "at least two point pairs are required".into(),
            ));
        }
        if let Some(&n) = self
            .landmark_numbers
            .iter()
            .find(|&&n| n == 0 || n > self.required_landmarks)
        {
            return Err(Error::InvalidTemplate(format!(
                "landmark number {} outside 1..={}",
                n, self.required_landmarks
            )));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(Error::InvalidTemplate(format!(
                "scale must be positive, got {}",
                self.scale
            )));
        }
        if self.output_width == 0 || self.output_height == 0 {
            return Err(Error::InvalidOutputSize {
                width: self.output_width,
                height: self.output_height,
            });
        }
        Ok(())
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.output_width, self.output_height)
    }

    /// Template points in output pixel coordinates.
    pub fn target_points(&self) -> Vec<Point> {
        self.points.iter().map(|p| *p * self.scale).collect()
    }

    /// Pick the template's landmarks out of a full landmark set, in template
    /// order.
    pub fn select(&self, landmarks: &Shape) -> Result<Vec<Point>> {
        let actual = landmarks.num_landmarks();
        if actual < self.required_landmarks {
            return Err(Error::InsufficientLandmarks {
                required: self.required_landmarks,
                actual,
            });
        }

        self.landmark_numbers
            .iter()
            .map(|&n| {
                landmarks
                    .points
                    .get(n.wrapping_sub(1))
                    .copied()
                    .ok_or(Error::InsufficientLandmarks {
                        required: n,
                        actual,
                    })
            })
            .collect()
    }
}

impl Default for AlignmentTemplate {
    fn default() -> Self {
        Self::canonical()
    }
}
