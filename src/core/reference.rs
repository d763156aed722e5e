use crate::common::{FaceGateError, Result};
use crate::core::encoder::FaceEncoder;
use crate::core::recognizer::Embedding;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The stored embedding of the authorized face. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct ReferenceEncoding {
    embedding: Arc<[f32]>,
    source: PathBuf,
}

impl ReferenceEncoding {
    pub fn new(embedding: Embedding, source: impl Into<PathBuf>) -> Self {
        Self { embedding: embedding.into(), source: source.into() }
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

pub struct ReferenceStore;

impl ReferenceStore {
    /// Encodes the reference image at `path`.
    ///
    /// With several faces in the image the first one the encoder reports is
    /// used.
    pub fn load(path: &Path, encoder: &dyn FaceEncoder) -> Result<ReferenceEncoding> {
        if !path.is_file() {
            return Err(FaceGateError::ReferenceNotFound {
                path: path.to_path_buf(),
                reason: "no such file".into(),
            });
        }

        tracing::info!("Loading reference image from {:?}", path);
        let image = image::open(path).map_err(|e| FaceGateError::ReferenceNotFound {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let faces = encoder
            .encode(&image.to_rgb8())
            .map_err(|e| match e {
                FaceGateError::Encoding(_) => e,
                other => FaceGateError::Encoding(other.to_string()),
            })?;

        if faces.len() > 1 {
            tracing::debug!("Reference image has {} faces, using the first", faces.len());
        }

        let first = faces.into_iter().next().ok_or(FaceGateError::NoFaceDetected)?;
        tracing::info!("Reference face encoded ({} dimensions)", first.embedding.len());
        Ok(ReferenceEncoding::new(first.embedding, path))
    }

    /// Like [`ReferenceStore::load`] but treats every failure as "no
    /// reference"; the gate then refuses to start.
    pub fn load_optional(path: &Path, encoder: &dyn FaceEncoder) -> Option<ReferenceEncoding> {
        match Self::load(path, encoder) {
            Ok(reference) => Some(reference),
            Err(e) => {
                tracing::warn!("No usable reference, authentication will fail: {}", e);
                None
            }
        }
    }
}
