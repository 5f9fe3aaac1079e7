use std::time::Duration;

/// Errors surfaced by the detection pipeline.
///
/// Per-tile pip counting failures never show up here; they degrade the tile
/// instead (see [`crate::detection::pips`]).
#[derive(thiserror::Error, Debug)]
pub enum DetectionError {
    #[error("failed to load model: {0}")]
    ModelLoadFailed(String),

    #[error("failed to decode image: {0}")]
    ImageDecodeFailed(String),

    #[error("failed to preprocess image: {0}")]
    PreprocessFailed(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("failed to annotate image: {0}")]
    AnnotationFailed(String),

    #[error("detection timed out after {0:?}")]
    DetectionTimeout(Duration),

    #[error("detection worker failed: {0}")]
    WorkerFatal(String),
}

impl From<image::ImageError> for DetectionError {
    fn from(e: image::ImageError) -> Self {
        DetectionError::ImageDecodeFailed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DetectionError>;
