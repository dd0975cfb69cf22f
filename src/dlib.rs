//! Loader for dlib's `shape_predictor` serialization.
//!
//! Reads both raw `.dat` files and bzip2-compressed `.dat.bz2` files into a
//! [`ShapePredictor`].
//!
//! # Example
//!
//! ```ignore
//! use face_align::dlib::load_dlib_model;
//!
//! let model = load_dlib_model("shape_predictor_68_face_landmarks.dat.bz2")?;
//! ```
//!
//! Pre-trained models are published in the dlib-models repository:
//!
//! ```bash
//! git clone --depth 1 https://github.com/davisking/dlib-models.git
//! ```

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;
use tracing::info;

use crate::error::{Error, Result};
use crate::features::FeaturePixel;
use crate::model::{CascadeStage, ShapePredictor};
use crate::tree::{RegressionTree, Split, TreeEnsemble};
use crate::types::{Point, Shape};

const SHAPE_PREDICTOR_VERSION: i64 = 1;

/// Upper bound on preallocation from lengths read out of a model file.
const MAX_PREALLOC: usize = 1 << 16;

fn capacity(len: usize) -> usize {
    len.min(MAX_PREALLOC)
}

/// Decoder for dlib's primitive encodings.
///
/// Integers: a control byte (bit 7 = sign, low nibble = byte count) followed
/// by the magnitude, little-endian. Floats: an integer mantissa and an
/// integer exponent, value = mantissa * 2^exponent.
struct DlibReader<R: Read> {
    reader: R,
}

impl<R: Read> DlibReader<R> {
    fn new(reader: R) -> Self {
        Self { reader }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_int(&mut self) -> Result<i64> {
        let control = self.read_byte()?;
        let num_bytes = (control & 0x0F) as usize;
        if num_bytes > 8 {
            return Err(Error::InvalidModel(format!(
                "integer encoded with {} bytes",
                num_bytes
            )));
        }

        let mut magnitude: u64 = 0;
        for i in 0..num_bytes {
            magnitude |= (self.read_byte()? as u64) << (8 * i);
        }

        let value = i64::try_from(magnitude).map_err(|_| {
            Error::InvalidModel(format!("integer magnitude {} out of range", magnitude))
        })?;
        Ok(if control & 0x80 != 0 { -value } else { value })
    }

    fn read_len(&mut self) -> Result<usize> {
        let value = self.read_int()?;
        usize::try_from(value)
            .map_err(|_| Error::InvalidModel(format!("expected a length, got {}", value)))
    }

    fn read_index(&mut self) -> Result<u32> {
        let value = self.read_int()?;
        u32::try_from(value)
            .map_err(|_| Error::InvalidModel(format!("expected an index, got {}", value)))
    }

    fn read_float(&mut self) -> Result<f32> {
        let mantissa = self.read_int()?;
        let exponent = self.read_int()?;
        let exponent = i32::try_from(exponent)
            .map_err(|_| Error::InvalidModel(format!("float exponent {} out of range", exponent)))?;
        if mantissa == 0 {
            return Ok(0.0);
        }
        Ok(((mantissa as f64) * 2f64.powi(exponent)) as f32)
    }

    /// A column vector serialized as `(-rows, -cols, data...)`.
    fn read_column(&mut self) -> Result<Vec<f32>> {
        let rows = -self.read_int()?;
        let cols = -self.read_int()?;
        if rows < 0 || cols != 1 {
            return Err(Error::InvalidModel(format!(
                "expected a column vector, got {}x{}",
                rows, cols
            )));
        }
        (0..rows).map(|_| self.read_float()).collect()
    }

    fn read_shape(&mut self) -> Result<Shape> {
        let data = self.read_column()?;
        if data.len() % 2 != 0 {
            return Err(Error::InvalidModel(format!(
                "shape vector has odd length {}",
                data.len()
            )));
        }
        Ok(Shape::from_flat(&data))
    }
}

/// Load a dlib shape predictor from a `.dat` or `.dat.bz2` file.
pub fn load_dlib_model<P: AsRef<Path>>(path: P) -> Result<ShapePredictor> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let model = if path.extension().is_some_and(|ext| ext == "bz2") {
        load_dlib_model_from_reader(BzDecoder::new(reader))?
    } else {
        load_dlib_model_from_reader(reader)?
    };

    info!(
        path = %path.display(),
        landmarks = model.num_landmarks(),
        stages = model.num_cascade_stages(),
        "loaded dlib shape predictor"
    );
    Ok(model)
}

/// Load an uncompressed dlib model from any reader.
pub fn load_dlib_model_from_reader<R: Read>(reader: R) -> Result<ShapePredictor> {
    let mut r = DlibReader::new(reader);

    let version = r.read_int()?;
    if version != SHAPE_PREDICTOR_VERSION {
        return Err(Error::InvalidModel(format!(
            "Unsupported shape_predictor version: {}",
            version
        )));
    }

    let mean_shape = r.read_shape()?;
    let num_landmarks = mean_shape.num_landmarks();

    let num_stages = r.read_len()?;
    let mut forests = Vec::with_capacity(capacity(num_stages));
    for _ in 0..num_stages {
        let num_trees = r.read_len()?;
        let trees = (0..num_trees)
            .map(|_| read_tree(&mut r, num_landmarks))
            .collect::<Result<Vec<_>>>()?;
        forests.push(trees);
    }

    let anchors = read_nested(&mut r, |r| {
        let idx = r.read_len()?;
        u16::try_from(idx)
            .map_err(|_| Error::InvalidModel(format!("anchor index {} too large", idx)))
    })?;
    let offsets = read_nested(&mut r, |r| Ok(Point::new(r.read_float()?, r.read_float()?)))?;

    if anchors.len() != num_stages || offsets.len() != num_stages {
        return Err(Error::InvalidModel(format!(
            "{} stages but {} anchor tables and {} offset tables",
            num_stages,
            anchors.len(),
            offsets.len()
        )));
    }

    let mut cascade = Vec::with_capacity(capacity(num_stages));
    for (i, ((trees, stage_anchors), stage_offsets)) in
        forests.into_iter().zip(anchors).zip(offsets).enumerate()
    {
        if stage_anchors.len() != stage_offsets.len() {
            return Err(Error::InvalidModel(format!(
                "stage {}: {} anchors but {} offsets",
                i,
                stage_anchors.len(),
                stage_offsets.len()
            )));
        }
        let features = stage_anchors
            .into_iter()
            .zip(stage_offsets)
            .map(|(anchor, offset)| FeaturePixel { anchor, offset })
            .collect();
        cascade.push(CascadeStage::new(
            features,
            TreeEnsemble::new(trees, num_landmarks),
        )?);
    }

    ShapePredictor::new(mean_shape, cascade)
}

fn read_tree<R: Read>(r: &mut DlibReader<R>, num_landmarks: usize) -> Result<RegressionTree> {
    let num_splits = r.read_len()?;
    let mut splits = Vec::with_capacity(capacity(num_splits));
    for _ in 0..num_splits {
        let idx1 = r.read_index()?;
        let idx2 = r.read_index()?;
        let threshold = r.read_float()?;
        splits.push(Split {
            idx1,
            idx2,
            threshold,
        });
    }

    let num_leaves = r.read_len()?;
    let mut leaves = Vec::with_capacity(capacity(num_leaves));
    for _ in 0..num_leaves {
        let delta = r.read_shape()?;
        if delta.num_landmarks() != num_landmarks {
            return Err(Error::InvalidModel(format!(
                "leaf has {} landmarks, expected {}",
                delta.num_landmarks(),
                num_landmarks
            )));
        }
        leaves.push(delta);
    }

    RegressionTree::new(splits, leaves)
}

/// A `std::vector<std::vector<T>>`: outer length, then each inner vector.
fn read_nested<R, T, F>(r: &mut DlibReader<R>, mut item: F) -> Result<Vec<Vec<T>>>
where
    R: Read,
    F: FnMut(&mut DlibReader<R>) -> Result<T>,
{
    let outer = r.read_len()?;
    let mut result = Vec::with_capacity(capacity(outer));
    for _ in 0..outer {
        let inner = r.read_len()?;
        let mut values = Vec::with_capacity(capacity(inner));
        for _ in 0..inner {
            values.push(item(r)?);
        }
        result.push(values);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use image::{GrayImage, Luma};
    use std::io::Cursor;
    use std::path::PathBuf;

    fn write_int(v: &mut Vec<u8>, val: i64) {
        if val == 0 {
            v.push(0x00);
            return;
        }
        let magnitude = val.unsigned_abs();
        let num_bytes = (8 - magnitude.leading_zeros() as usize / 8).max(1);
        v.push(if val < 0 { 0x80 } else { 0x00 } | num_bytes as u8);
        for i in 0..num_bytes {
            v.push(((magnitude >> (8 * i)) & 0xFF) as u8);
        }
    }

    /// Encode as mantissa * 2^exponent with an integral mantissa.
    fn write_float(v: &mut Vec<u8>, val: f32) {
        if val == 0.0 {
            write_int(v, 0);
            write_int(v, 0);
            return;
        }
        let mut mantissa = val as f64;
        let mut exponent = 0i64;
        while mantissa.fract() != 0.0 {
            mantissa *= 2.0;
            exponent -= 1;
        }
        write_int(v, mantissa as i64);
        write_int(v, exponent);
    }

    fn write_column(v: &mut Vec<u8>, data: &[f32]) {
        write_int(v, -(data.len() as i64));
        write_int(v, -1);
        for &x in data {
            write_float(v, x);
        }
    }

    /// A two-landmark model with one stage and one single-split tree.
    fn tiny_model_bytes() -> Vec<u8> {
        let mut v = Vec::new();
        write_int(&mut v, 1); // version
        write_column(&mut v, &[0.25, 0.5, 0.75, 0.5]); // mean shape

        write_int(&mut v, 1); // stages
        write_int(&mut v, 1); // trees in stage 0
        write_int(&mut v, 1); // splits
        write_int(&mut v, 0); // idx1
        write_int(&mut v, 1); // idx2
        write_float(&mut v, 10.0); // threshold
        write_int(&mut v, 2); // leaves
        write_column(&mut v, &[0.0, -0.125, 0.0, -0.125]);
        write_column(&mut v, &[0.0, 0.125, 0.0, 0.125]);

        write_int(&mut v, 1); // anchor tables
        write_int(&mut v, 2);
        write_int(&mut v, 0);
        write_int(&mut v, 1);

        write_int(&mut v, 1); // offset tables
        write_int(&mut v, 2);
        write_float(&mut v, 0.0);
        write_float(&mut v, 0.0);
        write_float(&mut v, 0.0);
        write_float(&mut v, 0.0);
        v
    }

    #[test]
    fn read_varint() {
        let values = [0, 1, 127, 128, 255, 256, -1, -128, 70_000, -9_000_000_000];
        let mut data = Vec::new();
        for &x in &values {
            write_int(&mut data, x);
        }

        let mut reader = DlibReader::new(Cursor::new(data));
        for &x in &values {
            assert_eq!(reader.read_int().unwrap(), x);
        }
    }

    #[test]
    fn read_float_values() {
        let values = [0.0f32, 1.0, -1.0, 0.5, 0.25, 87.62145, -0.003];
        let mut data = Vec::new();
        for &x in &values {
            write_float(&mut data, x);
        }

        let mut reader = DlibReader::new(Cursor::new(data));
        for &x in &values {
            assert!((reader.read_float().unwrap() - x).abs() < 1e-6);
        }
    }

    #[test]
    fn parses_and_runs_synthetic_model() {
        let model = load_dlib_model_from_reader(Cursor::new(tiny_model_bytes())).unwrap();
        assert_eq!(model.num_landmarks(), 2);
        assert_eq!(model.num_cascade_stages(), 1);

        // Left anchor bright, right anchor dark: difference 200 > 10, go left (move up).
        let image = GrayImage::from_fn(40, 40, |x, _| Luma([if x < 20 { 200 } else { 0 }]));
        let face = BoundingBox::new(0.0, 0.0, 40.0, 40.0);
        let shape = model.predict(&image, &face).unwrap();
        assert!((shape[0].x - 10.0).abs() < 1e-4);
        assert!((shape[0].y - 15.0).abs() < 1e-4);
        assert!((shape[1].y - 15.0).abs() < 1e-4);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = Vec::new();
        write_int(&mut bytes, 2);
        let err = load_dlib_model_from_reader(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::InvalidModel(_)));
    }

    #[test]
    fn truncated_model_is_an_io_error() {
        let mut bytes = tiny_model_bytes();
        bytes.truncate(bytes.len() - 3);
        let err = load_dlib_model_from_reader(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn huge_counts_fail_without_allocating() {
        let mut bytes = Vec::new();
        write_int(&mut bytes, 1);
        write_column(&mut bytes, &[0.25, 0.5, 0.75, 0.5]);
        write_int(&mut bytes, 1 << 62); // stages
        let err = load_dlib_model_from_reader(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn out_of_range_integers_are_invalid() {
        // Negative sign with a magnitude of 2^64 - 1
        let mut bytes = vec![0x88];
        bytes.extend_from_slice(&[0xFF; 8]);
        let mut reader = DlibReader::new(Cursor::new(bytes));
        assert!(matches!(reader.read_int(), Err(Error::InvalidModel(_))));

        let mut bytes = Vec::new();
        write_int(&mut bytes, 1 << 40);
        let mut reader = DlibReader::new(Cursor::new(bytes));
        assert!(matches!(reader.read_index(), Err(Error::InvalidModel(_))));

        let mut bytes = Vec::new();
        write_int(&mut bytes, 3);
        write_int(&mut bytes, 1 << 40);
        let mut reader = DlibReader::new(Cursor::new(bytes));
        assert!(matches!(reader.read_float(), Err(Error::InvalidModel(_))));
    }

    fn dlib_models_dir() -> Option<PathBuf> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("dlib-models");
        path.exists().then_some(path)
    }

    /// Requires a checkout of the dlib-models repository next to Cargo.toml.
    #[test]
    fn load_68_point_model() {
        let Some(models_dir) = dlib_models_dir() else {
            eprintln!("Skipping test: dlib-models directory not found");
            return;
        };

        let model_path = models_dir.join("shape_predictor_68_face_landmarks.dat.bz2");
        if !model_path.exists() {
            eprintln!("Skipping test: model file not found");
            return;
        }

        let model = load_dlib_model(&model_path).expect("Failed to load 68-point model");
        assert_eq!(model.num_landmarks(), 68);
        assert!(model.num_cascade_stages() > 0);
    }
}
