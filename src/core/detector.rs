use crate::common::{Config, FaceGateError, Result};
use crate::common::config::DetectorConfig;
use ort::{GraphOptimizationLevel, Session, SessionOutputs};
use std::path::Path;
use image::{DynamicImage, imageops::FilterType};
use ndarray::Array4;

const NMS_IOU_THRESHOLD: f32 = 0.45;
const MAX_FACES: usize = 5;
const MIN_BOX_SIDE: f32 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// Builds an ONNX session for `model_path` at the configured optimization level.
pub(crate) fn load_session(name: &str, model_path: &Path, optimization_level: u32) -> Result<Session> {
    if !model_path.exists() {
        return Err(FaceGateError::Model(
            format!("{} model not found at: {:?}", name, model_path)
        ));
    }

    let opt_level = match optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    };

    tracing::info!("Loading {} model from {:?}", name, model_path);
    let session = Session::builder()?
        .with_optimization_level(opt_level)?
        .commit_from_file(model_path)?;

    Ok(session)
}

/// First output of a model run as a flat `f32` buffer plus its shape.
pub(crate) fn first_output(outputs: &SessionOutputs) -> Result<Option<(Vec<f32>, Vec<usize>)>> {
    if outputs.len() == 0 {
        return Ok(None);
    }
    let tensor = outputs[0].try_extract_tensor::<f32>()?;
    Ok(Some((tensor.iter().copied().collect(), tensor.shape().to_vec())))
}

pub struct FaceDetector {
    session: Session,
    config: DetectorConfig,
}

impl FaceDetector {
    pub fn new(config: &Config) -> Result<Self> {
        let session = load_session(
            "face_detector",
            &config.models.detector_path,
            config.performance.optimization_level,
        )?;

        Ok(Self {
            session,
            config: config.detector.clone(),
        })
    }

    /// Faces in `image` coordinates, highest confidence first.
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;

        let img_array = if image.width() == self.config.input_width
            && image.height() == self.config.input_height {
            self.image_to_array(image)
        } else {
            let resized = image.resize_exact(
                self.config.input_width,
                self.config.input_height,
                FilterType::Nearest
            );
            self.image_to_array(&resized)
        };

        let outputs = self.session.run(ort::inputs![img_array]?)?;
        let mut faces = match first_output(&outputs)? {
            Some((values, shape)) => decode_predictions(&values, &shape, &self.config),
            None => Vec::new(),
        };

        let scale_x = orig_width / self.config.input_width as f32;
        let scale_y = orig_height / self.config.input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }

    fn image_to_array(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        let raw = gray.as_raw();
        let mut array = Array4::<f32>::zeros((1, 3, height, width));

        let norm_factor = 1.0 / 255.0;
        for y in 0..height {
            let row_offset = y * width;
            for x in 0..width {
                let pixel_value = raw[row_offset + x] as f32 * norm_factor;
                array[[0, 0, y, x]] = pixel_value;
                array[[0, 1, y, x]] = pixel_value;
                array[[0, 2, y, x]] = pixel_value;
            }
        }

        array
    }
}

/// Turns raw YOLO output (`[1, N, 5]` or transposed `[1, 5, N]`) into
/// filtered, NMS-suppressed boxes in detector input space.
fn decode_predictions(values: &[f32], shape: &[usize], config: &DetectorConfig) -> Vec<FaceBox> {
    let (num_predictions, prediction_length, is_transposed) = match shape.len() {
        3 if shape[2] > shape[1] && shape[1] <= 10 => (shape[2], shape[1], true),
        3 => (shape[1], shape[2], false),
        2 => (shape[0], shape[1], false),
        _ => {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Vec::new();
        }
    };
    if prediction_length < 4 || values.len() < num_predictions * prediction_length {
        tracing::warn!("Detector output too short for shape {:?}", shape);
        return Vec::new();
    }

    let at = |i: usize, field: usize| -> f32 {
        if is_transposed {
            values[field * num_predictions + i]
        } else {
            values[i * prediction_length + field]
        }
    };

    let input_width = config.input_width as f32;
    let input_height = config.input_height as f32;
    let mut faces = Vec::new();

    for i in 0..num_predictions {
        let confidence = if prediction_length > 4 { at(i, 4) } else { 0.0 };
        if confidence <= 0.001 {
            continue;
        }

        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        // Normalized outputs are scaled to pixel space
        let scale = if cx > 1.0 || cy > 1.0 || w > 1.0 || h > 1.0 { 1.0 } else { input_width };
        let (cx, cy, w, h) = (cx * scale, cy * scale, w * scale, h * scale);

        let x1 = (cx - w / 2.0).max(0.0);
        let y1 = (cy - h / 2.0).max(0.0);
        let x2 = (cx + w / 2.0).min(input_width);
        let y2 = (cy + h / 2.0).min(input_height);

        if x2 - x1 > MIN_BOX_SIDE && y2 - y1 > MIN_BOX_SIDE {
            faces.push(FaceBox { x1, y1, x2, y2, confidence });
        }
    }

    // NMS before the confidence cut so duplicates of weak boxes go too
    let mut faces = apply_nms(faces, NMS_IOU_THRESHOLD);
    faces.retain(|face| face.confidence >= config.detection_confidence);
    faces.truncate(MAX_FACES);
    faces
}

fn apply_nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| calculate_iou(kept, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn calculate_iou(box1: &FaceBox, box2: &FaceBox) -> f32 {
    let x1 = box1.x1.max(box2.x1);
    let y1 = box1.y1.max(box2.y1);
    let x2 = box1.x2.min(box2.x2);
    let y2 = box1.y2.min(box2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = box1.width() * box1.height() + box2.width() * box2.height() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
