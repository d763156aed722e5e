use crate::camera::{Camera, CameraProvider};
use crate::common::config::CameraConfig;
use crate::common::{FaceGateError, Result};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
use std::fs;
use std::io;

/// Device index that asks for IR camera auto-detection.
pub const AUTO_DETECT_INDEX: u32 = 999;

const STREAM_BUFFERS: u32 = 4;

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub features: Vec<String>,
    pub likely_ir: bool,
    pub has_grayscale: bool,
}

/// Opens `/dev/video<N>` devices with the configured format.
#[derive(Debug, Clone)]
pub struct V4lCameraProvider {
    config: CameraConfig,
}

impl V4lCameraProvider {
    pub fn new(config: &CameraConfig) -> Self {
        Self { config: config.clone() }
    }
}

impl CameraProvider for V4lCameraProvider {
    fn open(&self, device_index: u32) -> crate::common::Result<Box<dyn Camera>> {
        let index = if device_index == AUTO_DETECT_INDEX {
            detect_ir_camera()?
        } else {
            device_index
        };
        Ok(Box::new(V4lCamera::open(index, &self.config)?))
    }
}

pub struct V4lCamera {
    stream: Option<Stream<'static>>,
    device: Device,
    format: v4l::Format,
    index: u32,
    warmup_frames: u32,
    warmup_delay_ms: u64,
}

impl V4lCamera {
    pub fn open(index: u32, config: &CameraConfig) -> Result<Self> {
        tracing::info!("Opening camera device {}...", index);

        let device = Device::new(index as usize)
            .map_err(|e| FaceGateError::Camera(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device.query_caps()
            .map_err(|e| FaceGateError::Camera(format!("Failed to query capabilities: {}", e)))?;

        // Some IR devices report only metadata capture but still stream video
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} may not support standard video capture ({:?})", index, caps.capabilities);
        }

        let mut fmt = device.format()
            .map_err(|e| FaceGateError::Camera(format!("Failed to get format: {}", e)))?;

        fmt.width = config.width;
        fmt.height = config.height;
        if fmt.fourcc.repr != *b"GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let format = device.format()
            .map_err(|e| FaceGateError::Camera(format!("Failed to get final format: {}", e)))?;

        if !matches!(&format.fourcc.repr, b"GREY" | b"MJPG" | b"YUYV") {
            return Err(FaceGateError::Camera(format!(
                "Unsupported pixel format {} on camera {}", format.fourcc, index
            )));
        }
        if format.width != config.width || format.height != config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                format.width, format.height, config.width, config.height
            );
        }
        tracing::info!("Camera {} ready: {}x{} {}", index, format.width, format.height, format.fourcc);

        Ok(Self {
            stream: None,
            device,
            format,
            index,
            warmup_frames: config.warmup_frames,
            warmup_delay_ms: config.warmup_delay_ms,
        })
    }

    fn stream(&mut self) -> Result<&mut Stream<'static>> {
        if self.stream.is_none() {
            let mut stream = Stream::with_buffers(&mut self.device, Type::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| FaceGateError::FatalDevice(format!("Failed to create stream: {}", e)))?;

            // Warm-up lets the IR emitter settle
            for i in 0..self.warmup_frames {
                stream.next().map_err(|e| {
                    FaceGateError::FatalDevice(format!("Failed to capture warmup frame {}: {}", i, e))
                })?;
                std::thread::sleep(std::time::Duration::from_millis(self.warmup_delay_ms));
            }
            self.stream = Some(stream);
        }

        self.stream
            .as_mut()
            .ok_or_else(|| FaceGateError::FatalDevice("Stream unavailable".into()))
    }
}

impl Camera for V4lCamera {
    fn read_frame(&mut self) -> Result<Option<DynamicImage>> {
        let format = self.format.clone();
        let stream = self.stream()?;

        let buf = match stream.next() {
            Ok((buf, _meta)) => buf,
            Err(e) if is_transient_io(&e) => {
                return Err(FaceGateError::TransientFrame(format!("Failed to capture: {}", e)));
            }
            Err(e) => return Err(FaceGateError::FatalDevice(format!("Failed to capture: {}", e))),
        };

        decode_frame(&format.fourcc.repr, buf, format.width, format.height).map(Some)
    }

    fn release(&mut self) {
        self.stream = None;
        tracing::info!("Released camera device {}", self.index);
    }
}

fn is_transient_io(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

/// Raw buffer in the negotiated pixel format to an image.
pub fn decode_frame(fourcc: &[u8; 4], data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    match fourcc {
        b"GREY" => {
            let len = (width * height) as usize;
            let pixels = data.get(..len)
                .ok_or_else(|| FaceGateError::TransientFrame(format!(
                    "Short GREY frame: {} of {} bytes", data.len(), len
                )))?;
            let img_buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels.to_vec())
                .ok_or_else(|| FaceGateError::TransientFrame("Failed to create grayscale image buffer".into()))?;
            Ok(DynamicImage::ImageLuma8(img_buffer))
        }
        b"MJPG" => image::load_from_memory_with_format(data, ImageFormat::Jpeg)
            .map_err(|e| FaceGateError::TransientFrame(format!("Corrupt MJPG frame: {}", e))),
        b"YUYV" => yuyv_to_rgb(data, width, height).map(DynamicImage::ImageRgb8),
        other => Err(FaceGateError::FatalDevice(format!(
            "Unsupported pixel format {}", String::from_utf8_lossy(other)
        ))),
    }
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<ImageBuffer<Rgb<u8>, Vec<u8>>> {
    let len = (width * height * 2) as usize;
    let packed = data.get(..len)
        .ok_or_else(|| FaceGateError::TransientFrame(format!(
            "Short YUYV frame: {} of {} bytes", data.len(), len
        )))?;

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in packed.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0] as f32, chunk[1] as f32 - 128.0, chunk[2] as f32, chunk[3] as f32 - 128.0);
        for y in [y0, y1] {
            rgb.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
        }
    }

    ImageBuffer::from_raw(width, height, rgb)
        .ok_or_else(|| FaceGateError::TransientFrame("Failed to create RGB image buffer".into()))
}

/// Every `/dev/video*` node that answers a capability query.
pub fn list_all_cameras() -> Result<Vec<CameraInfo>> {
    let mut cameras = Vec::new();

    for entry in fs::read_dir("/dev")? {
        let path = entry?.path();
        let Some(index) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("video"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };

        let Ok(device) = Device::new(index as usize) else { continue };
        let Ok(caps) = device.query_caps() else { continue };

        let mut features = Vec::new();
        let mut likely_ir = false;
        let mut has_grayscale = false;

        if caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            features.push("VIDEO_CAPTURE".to_string());
        } else if caps.capabilities.contains(v4l::capability::Flags::META_CAPTURE) {
            features.push("METADATA_CAPTURE (may work for IR)".to_string());
        }

        for fmt in device.enum_formats().unwrap_or_default() {
            match &fmt.fourcc.repr {
                b"GREY" | b"Y8  " | b"Y16 " => {
                    features.push(format!("Grayscale ({})", fmt.fourcc));
                    likely_ir = true;
                    has_grayscale = true;
                }
                b"MJPG" | b"YUYV" => features.push(format!("Color ({})", fmt.fourcc)),
                _ => {}
            }
        }

        if caps.card.contains("BRIO") || caps.card.contains("IR") || caps.card.contains("Infrared") {
            likely_ir = true;
        }

        cameras.push(CameraInfo { index, name: caps.card.clone(), features, likely_ir, has_grayscale });
    }

    cameras.sort_by_key(|c| c.index);
    Ok(cameras)
}

/// Prefers a grayscale (IR) capture device, then anything named like one,
/// then `/dev/video0`.
pub fn detect_ir_camera() -> Result<u32> {
    let cameras = list_all_cameras()?;
    let capture = |c: &&CameraInfo| c.features.iter().any(|f| f == "VIDEO_CAPTURE");

    let selected = cameras.iter().filter(capture).find(|c| c.has_grayscale)
        .or_else(|| cameras.iter().filter(capture).find(|c| c.likely_ir));

    match selected {
        Some(camera) => {
            tracing::info!("Selected camera: /dev/video{} ({})", camera.index, camera.name);
            Ok(camera.index)
        }
        None => {
            tracing::info!("No IR camera detected, falling back to default camera (device 0)");
            Ok(0)
        }
    }
}
