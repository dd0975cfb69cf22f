//! Checks against published dlib models. Skipped unless a checkout of
//! dlib-models sits next to Cargo.toml.

use face_align::{dlib::load_dlib_model, Aligner, BoundingBox};
use image::{DynamicImage, GrayImage, Luma};
use std::path::PathBuf;

fn model_path(name: &str) -> Option<PathBuf> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("dlib-models")
        .join(name);
    if path.exists() {
        Some(path)
    } else {
        eprintln!("Skipping test: {} not found", path.display());
        None
    }
}

/// pixel[x,y] = (x + y) % 256
fn gradient_image(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| Luma([((x + y) % 256) as u8]))
}

/// dlib's output for the 5-point model on a 100x100 gradient with the
/// rectangle (25, 25)-(75, 75).
const DLIB_REFERENCE_5POINT: [(f32, f32); 5] = [
    (68.0, 46.0),
    (60.0, 45.0),
    (40.0, 40.0),
    (48.0, 42.0),
    (51.0, 60.0),
];

#[test]
fn matches_dlib_5point_reference() {
    let Some(path) = model_path("shape_predictor_5_face_landmarks.dat.bz2") else {
        return;
    };
    let model = load_dlib_model(&path).expect("Failed to load model");
    assert_eq!(model.num_landmarks(), 5);

    let image = gradient_image(100, 100);
    let bbox = BoundingBox::from_corners(25.0, 25.0, 75.0, 75.0);
    let landmarks = model.predict(&image, &bbox).unwrap();

    let errors: Vec<f32> = DLIB_REFERENCE_5POINT
        .iter()
        .zip(&landmarks.points)
        .map(|(&(x, y), p)| (p.x - x).hypot(p.y - y))
        .collect();
    let max_error = errors.iter().cloned().fold(0.0f32, f32::max);
    let avg_error = errors.iter().sum::<f32>() / errors.len() as f32;

    assert!(max_error < 1.5, "Max error {:.2}px", max_error);
    assert!(avg_error < 1.0, "Avg error {:.2}px", avg_error);
}

#[test]
fn predicted_68_points_align() {
    let Some(path) = model_path("shape_predictor_68_face_landmarks.dat.bz2") else {
        return;
    };
    let model = load_dlib_model(&path).expect("Failed to load model");
    assert_eq!(model.num_landmarks(), 68);

    let image = gradient_image(200, 200);
    let bbox = BoundingBox::new(50.0, 50.0, 100.0, 100.0);
    let landmarks = model.predict(&image, &bbox).unwrap();

    let margin = 50.0;
    for (i, p) in landmarks.points.iter().enumerate() {
        assert!(
            p.x >= bbox.x - margin && p.x <= bbox.x + bbox.width + margin,
            "Landmark {} x={} outside expected range",
            i,
            p.x
        );
        assert!(
            p.y >= bbox.y - margin && p.y <= bbox.y + bbox.height + margin,
            "Landmark {} y={} outside expected range",
            i,
            p.y
        );
    }

    let aligned = Aligner::canonical()
        .align(&DynamicImage::ImageLuma8(image), &landmarks)
        .unwrap();
    assert_eq!((aligned.width(), aligned.height()), (300, 300));
}
