use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model deserialization error: {0}")]
    Deserialization(#[from] bincode::Error),

    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Degenerate fit: source landmarks have no spread")]
    DegenerateFit,

    #[error("Insufficient landmarks: need {required}, got {actual}")]
    InsufficientLandmarks { required: usize, actual: usize },

    #[error("Point count mismatch: {src} source points vs {dst} target points")]
    PointCountMismatch { src: usize, dst: usize },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid output size {width}x{height}")]
    InvalidOutputSize { width: u32, height: u32 },

    #[error("No face detected")]
    NoFaceDetected,

    #[error("Face detector error: {0}")]
    Detector(String),
}

pub type Result<T> = std::result::Result<T, Error>;
