use crate::common::{Config, FaceGateError, Result};
use crate::common::config::RecognizerConfig;
use crate::core::detector::{first_output, load_session, FaceBox};
use ort::Session;
use image::{DynamicImage, imageops::FilterType};
use ndarray::Array4;

pub type Embedding = Vec<f32>;

pub struct FaceRecognizer {
    session: Session,
    config: RecognizerConfig,
}

impl FaceRecognizer {
    pub fn new(config: &Config) -> Result<Self> {
        let session = load_session(
            "face_recognizer",
            &config.models.recognizer_path,
            config.performance.optimization_level,
        )?;

        Ok(Self {
            session,
            config: config.recognizer.clone(),
        })
    }

    /// Unit-length embedding of the face inside `face`.
    pub fn get_embedding(&self, image: &DynamicImage, face: &FaceBox) -> Result<Embedding> {
        let face_img = crop_face(image, face);

        let resized = face_img.resize_exact(
            self.config.input_size,
            self.config.input_size,
            FilterType::Triangle
        );

        let input_array = self.preprocess_face(&resized);
        let outputs = self.session.run(ort::inputs![input_array]?)?;

        let (raw, _shape) = first_output(&outputs)?
            .ok_or_else(|| FaceGateError::Model("Embedding model produced no output".into()))?;
        Ok(l2_normalize(raw))
    }

    fn preprocess_face(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let size = self.config.input_size as usize;
        let norm_val = self.config.normalization_value;
        let mut array = Array4::<f32>::zeros((1, 1, size, size));

        for y in 0..size {
            for x in 0..size {
                let pixel = gray.get_pixel(x as u32, y as u32);
                array[[0, 0, y, x]] = (pixel[0] as f32 - norm_val) / norm_val;
            }
        }

        array
    }
}

fn crop_face(image: &DynamicImage, face: &FaceBox) -> DynamicImage {
    let x = face.x1.max(0.0) as u32;
    let y = face.y1.max(0.0) as u32;
    let width = face.width().max(1.0) as u32;
    let height = face.height().max(1.0) as u32;

    image.crop_imm(x, y, width, height)
}

/// Scales `v` to unit length so Euclidean distances stay in [0, 2].
pub fn l2_normalize(mut v: Embedding) -> Embedding {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut v {
            *value /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_to_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_is_left_alone() {
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn crop_stays_inside_the_box() {
        let image = DynamicImage::new_luma8(100, 100);
        let face = FaceBox { x1: 10.0, y1: 20.0, x2: 40.0, y2: 80.0, confidence: 0.9 };
        let cropped = crop_face(&image, &face);
        assert_eq!((cropped.width(), cropped.height()), (30, 60));
    }
}
