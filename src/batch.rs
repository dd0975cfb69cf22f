//! Directory-level driver.
//!
//! Source layout is one sub-directory per identity holding `.jpg` photos.
//! Aligned images are written under `<output>/<identity>/` with their
//! original file names. A failing image is logged, recorded in the
//! [`BatchReport`] and skipped.

use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::detector::{FaceDetector, LandmarkPredictor};
use crate::error::Result;
use crate::pipeline::FacePipeline;

const IMAGE_EXTENSION: &str = "jpg";

/// `<source>/../aligned`
pub fn default_output_dir(source: &Path) -> PathBuf {
    source.join("..").join("aligned")
}

/// Identity directories directly under `source`, sorted by path.
pub fn identity_dirs(source: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(source)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// `.jpg` files (any case) in an identity directory, sorted by path.
pub fn identity_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_jpg = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(IMAGE_EXTENSION));
        if is_jpg && path.is_file() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub identity: String,
    /// The failing image, or the identity directory when the whole identity
    /// could not be processed.
    pub image: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub identities: usize,
    pub processed: usize,
    pub aligned: usize,
    pub failures: Vec<Failure>,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

pub struct BatchAligner<D, P> {
    pipeline: FacePipeline<D, P>,
    flip_vertical: bool,
}

impl<D: FaceDetector, P: LandmarkPredictor> BatchAligner<D, P> {
    pub fn new(pipeline: FacePipeline<D, P>) -> Self {
        Self {
            pipeline,
            flip_vertical: false,
        }
    }

    /// Flip aligned images upside down before writing them.
    pub fn flip_vertical(mut self, flip: bool) -> Self {
        self.flip_vertical = flip;
        self
    }

    /// Align every identity under `source` into `output`.
    pub fn run(&mut self, source: &Path, output: &Path) -> Result<BatchReport> {
        fs::create_dir_all(output)?;

        let mut report = BatchReport::default();
        for dir in identity_dirs(source)? {
            if let Err(e) = self.align_identity(&dir, output, &mut report) {
                let identity = identity_name(&dir);
                warn!(%identity, error = %e, "identity skipped");
                report.failures.push(Failure {
                    identity,
                    image: dir,
                    error: e.to_string(),
                });
            }
        }

        info!(
            identities = report.identities,
            processed = report.processed,
            aligned = report.aligned,
            failed = report.failed(),
            "batch finished"
        );
        Ok(report)
    }

    /// Align one identity directory, appending results to `report`.
    pub fn align_identity(
        &mut self,
        identity_dir: &Path,
        output: &Path,
        report: &mut BatchReport,
    ) -> Result<()> {
        let identity = identity_name(identity_dir);
        report.identities += 1;
        let images = identity_images(identity_dir)?;

        if images.is_empty() {
            info!(%identity, "no images, skipping");
            return Ok(());
        }

        let target_dir = output.join(&identity);
        fs::create_dir_all(&target_dir)?;

        let total = images.len();
        for (i, path) in images.into_iter().enumerate() {
            debug!(%identity, "{}/{}", i + 1, total);
            report.processed += 1;

            let Some(file_name) = path.file_name() else {
                continue;
            };
            let destination = target_dir.join(file_name);

            match self.align_file(&path, &destination) {
                Ok(()) => report.aligned += 1,
                Err(e) => {
                    warn!(%identity, image = %path.display(), error = %e, "alignment failed");
                    report.failures.push(Failure {
                        identity: identity.clone(),
                        image: path,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(%identity, images = total, "identity aligned");
        Ok(())
    }

    fn align_file(&mut self, source: &Path, destination: &Path) -> Result<()> {
        let image = image::open(source)?;
        let mut aligned = self.pipeline.process(&image)?;
        if self.flip_vertical {
            aligned = aligned.flipv();
        }
        save_image(&aligned, destination)
    }
}

fn identity_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Write an image, converting to a format JPEG can hold when needed.
pub fn save_image(image: &DynamicImage, path: &Path) -> Result<()> {
    let is_jpeg = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));

    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image.save(path)?,
        other if is_jpeg => DynamicImage::ImageRgb8(other.to_rgb8()).save(path)?,
        other => other.save(path)?,
    }
    Ok(())
}
