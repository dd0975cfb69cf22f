//! Detection, landmark prediction and alignment wired together.

use image::DynamicImage;
use tracing::{debug, warn};

use crate::aligner::Aligner;
use crate::detector::{FaceDetector, LandmarkPredictor};
use crate::error::{Error, Result};
use crate::types::{BoundingBox, Shape};

/// What to do when the detector finds no face.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum NoFacePolicy {
    /// Report [`Error::NoFaceDetected`].
    #[default]
    Fail,
    /// Predict landmarks inside a fixed box instead.
    FixedBox(BoundingBox),
}

impl NoFacePolicy {
    /// The `(50, 50)-(200, 200)` box historically used for undetected faces.
    pub fn legacy_box() -> Self {
        NoFacePolicy::FixedBox(BoundingBox::from_corners(50.0, 50.0, 200.0, 200.0))
    }
}

/// Landmarks found for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    pub face: BoundingBox,
    /// `false` when `face` came from the [`NoFacePolicy`] fallback.
    pub detected: bool,
    pub shape: Shape,
}

pub struct FacePipeline<D, P> {
    detector: D,
    predictor: P,
    aligner: Aligner,
    no_face: NoFacePolicy,
}

impl<D: FaceDetector, P: LandmarkPredictor> FacePipeline<D, P> {
    pub fn new(detector: D, predictor: P, aligner: Aligner) -> Self {
        Self {
            detector,
            predictor,
            aligner,
            no_face: NoFacePolicy::default(),
        }
    }

    pub fn with_no_face_policy(mut self, policy: NoFacePolicy) -> Self {
        self.no_face = policy;
        self
    }

    /// Detect the best face and predict its landmarks.
    pub fn landmarks(&mut self, image: &DynamicImage) -> Result<FaceLandmarks> {
        let gray = image.to_luma8();
        let faces = self.detector.detect(&gray)?;

        let (face, detected) = match (faces.first(), self.no_face) {
            (Some(face), _) => (*face, true),
            (None, NoFacePolicy::FixedBox(face)) => {
                warn!(?face, "no face detected, using fixed box");
                (face, false)
            }
            (None, NoFacePolicy::Fail) => return Err(Error::NoFaceDetected),
        };
        if faces.len() > 1 {
            debug!(count = faces.len(), "several faces detected, using the first");
        }

        let shape = self.predictor.predict(&gray, &face)?;
        Ok(FaceLandmarks {
            face,
            detected,
            shape,
        })
    }

    /// Full per-image processing: detect, predict, align.
    pub fn process(&mut self, image: &DynamicImage) -> Result<DynamicImage> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::InvalidImage("image has zero area".into()));
        }
        let found = self.landmarks(image)?;
        self.aligner.align(image, &found.shape)
    }
}
