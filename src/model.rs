use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::features::{extract_feature_pixels, FeaturePixel, ImageAccess};
use crate::transform::fit_similarity;
use crate::tree::TreeEnsemble;
use crate::types::{BoundingBox, Shape};

/// One refinement step of the cascade: where to sample, and the trees that
/// turn those samples into a shape update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeStage {
    features: Vec<FeaturePixel>,
    ensemble: TreeEnsemble,
}

impl CascadeStage {
    pub fn new(features: Vec<FeaturePixel>, ensemble: TreeEnsemble) -> Result<Self> {
        if let Some(max) = ensemble.max_feature_index() {
            if max as usize >= features.len() {
                return Err(Error::InvalidModel(format!(
                    "split references feature {} but stage has {}",
                    max,
                    features.len()
                )));
            }
        }
        Ok(Self { features, ensemble })
    }
}

/// Cascaded ensemble-of-regression-trees landmark predictor
/// (Kazemi & Sullivan, CVPR 2014).
///
/// Shapes are kept in the normalized [0,1] frame of the face box and only
/// mapped into image coordinates at the end.
///
/// # Usage
///
/// ```ignore
/// let model = load_dlib_model("shape_predictor_68_face_landmarks.dat.bz2")?;
/// let face = BoundingBox::new(100.0, 100.0, 200.0, 200.0);
/// let landmarks = model.predict(&gray, &face)?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapePredictor {
    mean_shape: Shape,
    cascade: Vec<CascadeStage>,
}

impl ShapePredictor {
    pub fn new(mean_shape: Shape, cascade: Vec<CascadeStage>) -> Result<Self> {
        let n = mean_shape.num_landmarks();
        if n < 2 {
            return Err(Error::InvalidModel(format!(
                "mean shape needs at least 2 landmarks, got {}",
                n
            )));
        }
        for (i, stage) in cascade.iter().enumerate() {
            if stage.ensemble.num_landmarks != n {
                return Err(Error::InvalidModel(format!(
                    "stage {} predicts {} landmarks, mean shape has {}",
                    i, stage.ensemble.num_landmarks, n
                )));
            }
            if let Some(f) = stage.features.iter().find(|f| f.anchor as usize >= n) {
                return Err(Error::InvalidModel(format!(
                    "stage {} anchors on landmark {} of {}",
                    i, f.anchor, n
                )));
            }
        }
        Ok(Self {
            mean_shape,
            cascade,
        })
    }

    /// Load a model saved with [`ShapePredictor::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let model: Self = bincode::deserialize(&bytes)?;
        Self::new(model.mean_shape, model.cascade)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let bytes = bincode::serialize(self)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    pub fn num_landmarks(&self) -> usize {
        self.mean_shape.num_landmarks()
    }

    pub fn num_cascade_stages(&self) -> usize {
        self.cascade.len()
    }

    pub fn mean_shape(&self) -> &Shape {
        &self.mean_shape
    }

    /// Predict landmarks, in image coordinates, for the face in `face_rect`.
    pub fn predict<I: ImageAccess>(&self, image: &I, face_rect: &BoundingBox) -> Result<Shape> {
        let mut current = self.mean_shape.clone();

        for stage in &self.cascade {
            let pose = fit_similarity(&self.mean_shape.points, &current.points)?.transform;
            let pixels =
                extract_feature_pixels(&stage.features, &pose, &current, face_rect, image);
            current.add_delta(&stage.ensemble.predict(&pixels));
        }

        debug!(
            landmarks = current.num_landmarks(),
            stages = self.cascade.len(),
            "predicted shape"
        );
        Ok(current.map(|p| face_rect.denormalize_point(p)))
    }
}

/// Builder for assembling a [`ShapePredictor`] stage by stage.
#[derive(Default)]
pub struct ShapePredictorBuilder {
    mean_shape: Option<Shape>,
    cascade: Vec<CascadeStage>,
}

impl ShapePredictorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mean_shape(mut self, shape: Shape) -> Self {
        self.mean_shape = Some(shape);
        self
    }

    pub fn add_cascade_stage(mut self, stage: CascadeStage) -> Self {
        self.cascade.push(stage);
        self
    }

    pub fn build(self) -> Result<ShapePredictor> {
        let mean_shape = self
            .mean_shape
            .ok_or_else(|| Error::InvalidModel("Missing mean shape".into()))?;

        if self.cascade.is_empty() {
            return Err(Error::InvalidModel(
                "Cascade must have at least one stage".into(),
            ));
        }

        ShapePredictor::new(mean_shape, self.cascade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{RegressionTree, Split};
    use crate::types::Point;
    use image::{GrayImage, Luma};

    fn mean_shape() -> Shape {
        Shape::new(vec![
            Point::new(0.30, 0.30), // left eye
            Point::new(0.70, 0.30), // right eye
            Point::new(0.50, 0.55), // nose tip
            Point::new(0.35, 0.75), // left mouth
            Point::new(0.65, 0.75), // right mouth
        ])
    }

    fn zero_stage() -> CascadeStage {
        let ensemble = TreeEnsemble::new(vec![RegressionTree::leaf(Shape::zeros(5))], 5);
        CascadeStage::new(Vec::new(), ensemble).unwrap()
    }

    /// A stage that nudges every landmark right when the pixel at landmark 0
    /// is brighter than the one at landmark 2, left otherwise.
    fn brightness_stage() -> CascadeStage {
        let features = vec![
            FeaturePixel {
                anchor: 0,
                offset: Point::zero(),
            },
            FeaturePixel {
                anchor: 2,
                offset: Point::zero(),
            },
        ];
        let tree = RegressionTree::new(
            vec![Split {
                idx1: 0,
                idx2: 1,
                threshold: 0.0,
            }],
            vec![
                Shape::new(vec![Point::new(0.1, 0.0); 5]),
                Shape::new(vec![Point::new(-0.1, 0.0); 5]),
            ],
        )
        .unwrap();
        CascadeStage::new(features, TreeEnsemble::new(vec![tree], 5)).unwrap()
    }

    #[test]
    fn model_initialization() {
        let model = ShapePredictor::new(mean_shape(), vec![zero_stage()]).unwrap();
        assert_eq!(model.num_landmarks(), 5);
        assert_eq!(model.num_cascade_stages(), 1);
    }

    #[test]
    fn zero_deltas_predict_mean_shape_in_box() {
        let model = ShapePredictor::new(mean_shape(), vec![zero_stage()]).unwrap();
        let image = GrayImage::from_pixel(100, 100, Luma([128]));
        let face_rect = BoundingBox::new(10.0, 10.0, 80.0, 80.0);

        let landmarks = model.predict(&image, &face_rect).unwrap();
        assert_eq!(landmarks.num_landmarks(), 5);
        assert!((landmarks[0].x - 34.0).abs() < 1e-4);
        assert!((landmarks[0].y - 34.0).abs() < 1e-4);
        assert!((landmarks[4].x - 62.0).abs() < 1e-4);
    }

    #[test]
    fn stages_react_to_image_content() {
        let model = ShapePredictor::new(mean_shape(), vec![brightness_stage()]).unwrap();
        let face_rect = BoundingBox::new(0.0, 0.0, 100.0, 100.0);

        // Bright upper half: landmark 0 (y = 30) brighter than the nose (y = 55)
        let bright_top = GrayImage::from_fn(100, 100, |_, y| Luma([if y < 40 { 255 } else { 0 }]));
        let moved = model.predict(&bright_top, &face_rect).unwrap();
        assert!((moved[0].x - 40.0).abs() < 1e-3);

        let dark_top = GrayImage::from_fn(100, 100, |_, y| Luma([if y < 40 { 0 } else { 255 }]));
        let moved = model.predict(&dark_top, &face_rect).unwrap();
        assert!((moved[0].x - 20.0).abs() < 1e-3);
    }

    #[test]
    fn rejects_inconsistent_stages() {
        let features = vec![FeaturePixel {
            anchor: 9,
            offset: Point::zero(),
        }];
        let stage = CascadeStage::new(
            features,
            TreeEnsemble::new(vec![RegressionTree::leaf(Shape::zeros(5))], 5),
        )
        .unwrap();
        assert!(matches!(
            ShapePredictor::new(mean_shape(), vec![stage]),
            Err(Error::InvalidModel(_))
        ));

        let tree = RegressionTree::new(
            vec![Split {
                idx1: 0,
                idx2: 4,
                threshold: 0.0,
            }],
            vec![Shape::zeros(5), Shape::zeros(5)],
        )
        .unwrap();
        assert!(CascadeStage::new(Vec::new(), TreeEnsemble::new(vec![tree], 5)).is_err());
    }

    #[test]
    fn builder_requires_mean_shape_and_stage() {
        assert!(ShapePredictorBuilder::new().build().is_err());
        assert!(ShapePredictorBuilder::new()
            .mean_shape(mean_shape())
            .build()
            .is_err());

        let model = ShapePredictorBuilder::new()
            .mean_shape(mean_shape())
            .add_cascade_stage(zero_stage())
            .add_cascade_stage(brightness_stage())
            .build()
            .unwrap();
        assert_eq!(model.num_cascade_stages(), 2);
    }

    #[test]
    fn save_and_load_model() {
        let model = ShapePredictor::new(mean_shape(), vec![brightness_stage()]).unwrap();

        let temp_path = std::env::temp_dir().join("face_align_test_model.bin");
        model.save(&temp_path).unwrap();

        let loaded = ShapePredictor::load(&temp_path).unwrap();
        assert_eq!(loaded.num_landmarks(), model.num_landmarks());
        assert_eq!(loaded.num_cascade_stages(), model.num_cascade_stages());
        assert_eq!(loaded.mean_shape(), model.mean_shape());

        std::fs::remove_file(temp_path).ok();
    }
}
