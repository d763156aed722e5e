use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::error::{FaceGateError, Result};
use crate::common::paths;

const LOCAL_CONFIG_PATH: &str = "configs/face-gate.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    /// `999` means auto-detect.
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

fn default_width() -> u32 { 640 }
fn default_height() -> u32 { 480 }
fn default_warmup_delay() -> u64 { 50 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_width(),
            height: default_height(),
            warmup_frames: 0,
            warmup_delay_ms: default_warmup_delay(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_detector_path")]
    pub detector_path: PathBuf,
    #[serde(default = "default_recognizer_path")]
    pub recognizer_path: PathBuf,
}

fn default_detector_path() -> PathBuf { PathBuf::from("models/face_detector.onnx") }
fn default_recognizer_path() -> PathBuf { PathBuf::from("models/face_embedding.onnx") }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector_path: default_detector_path(),
            recognizer_path: default_recognizer_path(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReferenceConfig {
    #[serde(default = "paths::default_reference_image")]
    pub image_path: PathBuf,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self { image_path: paths::default_reference_image() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MatchingConfig {
    /// Maximum embedding distance accepted as a match.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    /// Run extraction on one frame out of every `extract_every`.
    #[serde(default = "default_extract_every")]
    pub extract_every: u32,
    #[serde(default = "default_max_frame_errors")]
    pub max_consecutive_frame_errors: u32,
}

fn default_tolerance() -> f32 { 0.6 }
fn default_extract_every() -> u32 { 2 }
fn default_max_frame_errors() -> u32 { 5 }

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            extract_every: default_extract_every(),
            max_consecutive_frame_errors: default_max_frame_errors(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_input")]
    pub input_width: u32,
    #[serde(default = "default_detector_input")]
    pub input_height: u32,
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,
}

fn default_detector_input() -> u32 { 640 }
fn default_detection_confidence() -> f32 { 0.5 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: default_detector_input(),
            input_height: default_detector_input(),
            detection_confidence: default_detection_confidence(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognizerConfig {
    #[serde(default = "default_recognizer_input")]
    pub input_size: u32,
    #[serde(default = "default_normalization")]
    pub normalization_value: f32,
}

fn default_recognizer_input() -> u32 { 112 }
fn default_normalization() -> f32 { 127.5 }

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            input_size: default_recognizer_input(),
            normalization_value: default_normalization(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_optimization_level() -> u32 { 3 }

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { optimization_level: default_optimization_level() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PreviewConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Linear downsampling factor applied before encoding.
    #[serde(default = "default_preview_scale")]
    pub scale: f32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_true() -> bool { true }
fn default_preview_scale() -> f32 { 0.5 }
fn default_jpeg_quality() -> u8 { 80 }

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scale: default_preview_scale(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let local = PathBuf::from(LOCAL_CONFIG_PATH);
        if local.exists() {
            return Self::load_from_path(&local);
        }
        Self::load_from_path(&paths::system_config_file())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FaceGateError::Configuration(format!(
                "Config file not found: {}. Please create it from the example.", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| FaceGateError::Configuration(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(FaceGateError::Configuration(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(FaceGateError::Configuration(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        // Euclidean distance between unit vectors never exceeds 2
        if !(self.matching.tolerance > 0.0 && self.matching.tolerance <= 2.0) {
            return Err(FaceGateError::Configuration(format!(
                "Match tolerance must be in (0.0, 2.0], got {}", self.matching.tolerance
            )));
        }
        if self.matching.extract_every == 0 {
            return Err(FaceGateError::Configuration(
                "extract_every must be at least 1".into()
            ));
        }

        if self.detector.detection_confidence < 0.0 || self.detector.detection_confidence > 1.0 {
            return Err(FaceGateError::Configuration(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.detector.detection_confidence
            )));
        }
        if self.detector.input_width == 0 || self.detector.input_width > 4096 {
            return Err(FaceGateError::Configuration(format!(
                "Detector input width must be between 1 and 4096, got {}",
                self.detector.input_width
            )));
        }
        if self.detector.input_height == 0 || self.detector.input_height > 4096 {
            return Err(FaceGateError::Configuration(format!(
                "Detector input height must be between 1 and 4096, got {}",
                self.detector.input_height
            )));
        }
        if self.recognizer.input_size == 0 || self.recognizer.input_size > 1024 {
            return Err(FaceGateError::Configuration(format!(
                "Recognizer input size must be between 1 and 1024, got {}",
                self.recognizer.input_size
            )));
        }

        if !(self.preview.scale > 0.0 && self.preview.scale <= 1.0) {
            return Err(FaceGateError::Configuration(format!(
                "Preview scale must be in (0.0, 1.0], got {}", self.preview.scale
            )));
        }
        if self.preview.jpeg_quality == 0 || self.preview.jpeg_quality > 100 {
            return Err(FaceGateError::Configuration(format!(
                "Preview JPEG quality must be between 1 and 100, got {}",
                self.preview.jpeg_quality
            )));
        }

        Ok(())
    }
}
