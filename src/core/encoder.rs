use crate::common::{Config, FaceGateError, Result};
use crate::core::detector::{FaceBox, FaceDetector};
use crate::core::recognizer::{Embedding, FaceRecognizer};
use image::{DynamicImage, RgbImage};

/// One face found in an image.
#[derive(Debug, Clone)]
pub struct FaceEncoding {
    pub location: FaceBox,
    pub embedding: Embedding,
}

/// Facial-feature extraction and comparison.
///
/// `encode` returns faces in the order the detector ranks them; callers that
/// need a single face take the first one.
pub trait FaceEncoder: Send + Sync {
    fn encode(&self, image: &RgbImage) -> Result<Vec<FaceEncoding>>;

    fn compare(&self, known: &[f32], candidate: &[f32], tolerance: f32) -> bool {
        face_distance(known, candidate) <= tolerance
    }
}

/// Euclidean distance between two embeddings. Mismatched lengths never match.
pub fn face_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Detector + embedding model pair backed by ONNX Runtime.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            detector: FaceDetector::new(config)?,
            recognizer: FaceRecognizer::new(config)?,
        })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&self, image: &RgbImage) -> Result<Vec<FaceEncoding>> {
        let frame = DynamicImage::ImageRgb8(image.clone());
        let faces = self.detector.detect(&frame)?;
        tracing::debug!("Detector returned {} face(s)", faces.len());

        faces
            .into_iter()
            .map(|location| {
                let embedding = self
                    .recognizer
                    .get_embedding(&frame, &location)
                    .map_err(|e| FaceGateError::Encoding(e.to_string()))?;
                Ok(FaceEncoding { location, embedding })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoFaces;

    impl FaceEncoder for NoFaces {
        fn encode(&self, _image: &RgbImage) -> Result<Vec<FaceEncoding>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn distance_is_euclidean() {
        let d = face_distance(&[0.0, 3.0], &[4.0, 0.0]);
        assert!((d - 5.0).abs() < 1e-6);
        assert_eq!(face_distance(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn length_mismatch_never_matches() {
        assert!(face_distance(&[0.0], &[0.0, 0.0]).is_infinite());
        assert!(!NoFaces.compare(&[0.0], &[0.0, 0.0], 0.6));
    }

    #[test]
    fn default_compare_uses_tolerance() {
        let known = vec![0.0f32; 128];
        let mut near = known.clone();
        near[0] = 0.4;
        let mut far = known.clone();
        far[0] = 0.7;

        assert!(NoFaces.compare(&known, &near, 0.6));
        assert!(!NoFaces.compare(&known, &far, 0.6));
    }
}
