use base64::Engine as _;
use image::DynamicImage;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthenticationState {
    Idle,
    Running,
    Authenticated,
    Stopped,
}

/// One acquired frame, alive for a single loop iteration.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub sequence: u64,
    pub image: DynamicImage,
}

/// Downsampled JPEG derived from a [`FrameSample`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub jpeg: Vec<u8>,
}

impl PreviewFrame {
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.jpeg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub authenticated: bool,
}

/// Why a capture session ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEnd {
    Matched { sequence: u64, distance: f32 },
    Stopped,
    EndOfStream,
    DeviceFailure(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub end: SessionEnd,
    /// Frames successfully acquired.
    pub frames: u64,
    /// Frames that went through extraction.
    pub extractions: u64,
}

/// Receives gate events on the control plane.
pub trait Subscriber {
    fn on_status_change(&mut self, authenticated: bool);

    fn on_frame(&mut self, frame: PreviewFrame);

    /// Called after the worker has released the camera.
    fn on_session_end(&mut self, _end: SessionEnd) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trips_jpeg_bytes() {
        let frame = PreviewFrame { sequence: 1, width: 1, height: 1, jpeg: vec![0xff, 0xd8, 0xff] };
        assert_eq!(frame.to_base64(), "/9j/");
    }

    #[test]
    fn preview_json_omits_raw_bytes() {
        let frame = PreviewFrame { sequence: 4, width: 320, height: 240, jpeg: vec![1, 2, 3] };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["sequence"], 4);
        assert!(json.get("jpeg").is_none());
    }
}
