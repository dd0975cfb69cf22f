//! # face-align
//!
//! Pure Rust face alignment: warp a face photo so that its eyes, nose and
//! mouth land on fixed positions of a 300x300 canvas.
//!
//! This crate provides:
//! - **Alignment**: select 9 of the 68 standard landmarks, fit a similarity
//!   transform onto a canonical template and resample with cubic B-splines
//! - **Landmark Detection**: ERT-based shape predictor that reads dlib
//!   `.dat` / `.dat.bz2` models
//! - **Pipeline**: face detection (SeetaFace via `rustface`), landmark
//!   prediction and alignment behind injectable traits
//! - **Batch**: align a directory of identity folders and report failures
//!
//! ## Algorithm Overview
//!
//! 1. Find the face box and predict 68 landmarks
//! 2. Pick landmarks 37, 40, 43, 46 (eye corners), 32, 34, 36 (nose) and
//!    49, 55 (mouth corners)
//! 3. Least-squares fit of scale, rotation and translation onto the
//!    template points (scaled by 3.5)
//! 4. For every output pixel, map back through the inverse transform and
//!    interpolate the source image
//!
//! ## Quick Start
//!
//! ```rust
//! use face_align::{Aligner, Point, Shape};
//! use image::{DynamicImage, RgbImage};
//!
//! let aligner = Aligner::canonical();
//!
//! // Landmarks normally come from a `LandmarkPredictor`
//! let mut landmarks = Shape::new(vec![Point::new(150.0, 150.0); 68]);
//! for (&n, target) in aligner
//!     .template()
//!     .landmark_numbers
//!     .iter()
//!     .zip(aligner.target_points())
//! {
//!     landmarks[n - 1] = *target;
//! }
//!
//! let image = DynamicImage::ImageRgb8(RgbImage::new(400, 320));
//! let aligned = aligner.align(&image, &landmarks).unwrap();
//! assert_eq!((aligned.width(), aligned.height()), (300, 300));
//! ```
//!
//! ## Custom Collaborators
//!
//! Implement [`FaceDetector`] or [`LandmarkPredictor`] to plug other models
//! into [`FacePipeline`]:
//!
//! ```rust
//! use face_align::{BoundingBox, FaceDetector, Result};
//! use image::GrayImage;
//!
//! struct WholeImage;
//!
//! impl FaceDetector for WholeImage {
//!     fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>> {
//!         let (w, h) = image.dimensions();
//!         Ok(vec![BoundingBox::new(0.0, 0.0, w as f32, h as f32)])
//!     }
//! }
//! ```

mod aligner;
pub mod batch;
mod detector;
pub mod dlib;
mod error;
mod features;
pub mod logging;
mod model;
mod pipeline;
mod template;
mod transform;
mod tree;
mod types;
mod warp;

pub use aligner::{align, select_landmarks, Aligner};
pub use batch::{BatchAligner, BatchReport, Failure};
pub use detector::{FaceDetector, LandmarkPredictor, SeetaDetector, SeetaSettings};
pub use error::{Error, Result};
pub use features::{extract_feature_pixels, nearest_intensity, FeaturePixel, ImageAccess};
pub use model::{CascadeStage, ShapePredictor, ShapePredictorBuilder};
pub use pipeline::{FaceLandmarks, FacePipeline, NoFacePolicy};
pub use template::{
    AlignmentTemplate, LANDMARK_NUMBERS, OUTPUT_SIZE, REQUIRED_LANDMARKS, TEMPLATE_SCALE,
    TEMPLATE_X, TEMPLATE_Y,
};
pub use transform::{fit_similarity, SimilarityFit, SimilarityTransform};
pub use tree::{RegressionTree, Split, TreeEnsemble};
pub use types::{BoundingBox, Point, Shape};
pub use warp::{warp, warp_dynamic, Boundary, Channel, Interpolation};
