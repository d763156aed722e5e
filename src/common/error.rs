use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceGateError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Reference image not found at {path:?}: {reason}")]
    ReferenceNotFound { path: PathBuf, reason: String },

    #[error("No face detected")]
    NoFaceDetected,

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Frame error: {0}")]
    TransientFrame(String),

    #[error("Device failure: {0}")]
    FatalDevice(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Preview error: {0}")]
    Preview(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl FaceGateError {
    /// Per-frame hiccups the capture loop absorbs and continues past.
    pub fn is_transient(&self) -> bool {
        matches!(self, FaceGateError::TransientFrame(_))
    }

    /// Failures that make `start()` refuse to spawn a worker.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FaceGateError::Configuration(_)
                | FaceGateError::ReferenceNotFound { .. }
                | FaceGateError::NoFaceDetected
        )
    }
}

pub type Result<T> = std::result::Result<T, FaceGateError>;
