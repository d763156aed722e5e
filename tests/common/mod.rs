#![allow(dead_code)]

use facegate::camera::{Camera, CameraProvider};
use facegate::common::config::{MatchingConfig, PreviewConfig};
use facegate::core::{FaceBox, FaceEncoder, FaceEncoding, PreviewFrame, SessionEnd, Subscriber};
use facegate::{FaceGateError, ReferenceEncoding, Result, SessionSettings};
use image::{DynamicImage, Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

/// Pixel value the encoder refuses to process.
pub const UNREADABLE: u8 = 255;
/// Pixel value of a frame with nobody in it.
pub const EMPTY: u8 = 0;
/// Pixel value of a stranger, 0.9 away from the reference.
pub const STRANGER: u8 = 90;
/// Pixel value of the enrolled user, 0.4 away from the reference.
pub const OWNER: u8 = 40;

#[derive(Debug, Clone, Copy)]
pub enum Step {
    Frame(u8),
    Transient,
    Fatal,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub reads: AtomicUsize,
    pub releases: AtomicUsize,
}

impl Counters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

pub fn solid_frame(value: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([value, value, value])))
}

/// Plays back a fixed list of reads, then reports end of stream. With
/// `repeat` set it never ends and paces itself like a real device.
pub struct ScriptedCamera {
    steps: VecDeque<Step>,
    repeat: Option<u8>,
    counters: Arc<Counters>,
}

impl ScriptedCamera {
    pub fn new(steps: &[Step], counters: Arc<Counters>) -> Self {
        Self { steps: steps.iter().copied().collect(), repeat: None, counters }
    }

    pub fn endless(value: u8, counters: Arc<Counters>) -> Self {
        Self { steps: VecDeque::new(), repeat: Some(value), counters }
    }
}

impl Camera for ScriptedCamera {
    fn read_frame(&mut self) -> Result<Option<DynamicImage>> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);

        if let Some(value) = self.repeat {
            std::thread::sleep(Duration::from_millis(5));
            return Ok(Some(solid_frame(value)));
        }

        match self.steps.pop_front() {
            Some(Step::Frame(value)) => Ok(Some(solid_frame(value))),
            Some(Step::Transient) => Err(FaceGateError::TransientFrame("dropped buffer".into())),
            Some(Step::Fatal) => Err(FaceGateError::FatalDevice("unplugged".into())),
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out a fresh [`ScriptedCamera`] per open, all sharing one set of
/// counters.
pub struct ScriptedProvider {
    steps: Vec<Step>,
    repeat: Option<u8>,
    pub fail_open: AtomicBool,
    pub counters: Arc<Counters>,
}

impl ScriptedProvider {
    pub fn new(steps: &[Step]) -> Self {
        Self {
            steps: steps.to_vec(),
            repeat: None,
            fail_open: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn endless(value: u8) -> Self {
        Self { repeat: Some(value), ..Self::new(&[]) }
    }

    pub fn camera(&self) -> ScriptedCamera {
        match self.repeat {
            Some(value) => ScriptedCamera::endless(value, self.counters.clone()),
            None => ScriptedCamera::new(&self.steps, self.counters.clone()),
        }
    }
}

impl CameraProvider for ScriptedProvider {
    fn open(&self, device_index: u32) -> Result<Box<dyn Camera>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(FaceGateError::Camera(format!("Failed to open /dev/video{}", device_index)));
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.camera()))
    }
}

/// Reads the frame's pixel value as a distance in hundredths from
/// [`reference`].
#[derive(Default)]
pub struct FakeEncoder {
    pub calls: AtomicUsize,
}

impl FakeEncoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceEncoder for FakeEncoder {
    fn encode(&self, image: &RgbImage) -> Result<Vec<FaceEncoding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let value = image.get_pixel(0, 0)[0];
        match value {
            UNREADABLE => Err(FaceGateError::Model("inference failed".into())),
            EMPTY => Ok(vec![]),
            _ => Ok(vec![FaceEncoding {
                location: FaceBox { x1: 1.0, y1: 1.0, x2: 6.0, y2: 6.0, confidence: 0.9 },
                embedding: vec![1.0 - f32::from(value) / 100.0, 0.0],
            }]),
        }
    }
}

/// Holds every `encode` call until the test lets it go, then reports the
/// owner's face. Lets a test act while extraction is in flight.
pub struct GatedEncoder {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl GatedEncoder {
    /// The encoder, a receiver that fires when `encode` is entered, and a
    /// sender that lets one `encode` call finish.
    pub fn new() -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let encoder = Self { entered: Mutex::new(entered_tx), release: Mutex::new(release_rx) };
        (encoder, entered_rx, release_tx)
    }
}

impl FaceEncoder for GatedEncoder {
    fn encode(&self, _image: &RgbImage) -> Result<Vec<FaceEncoding>> {
        let _ = self.entered.lock().send(());
        let _ = self.release.lock().recv_timeout(Duration::from_secs(5));
        Ok(vec![FaceEncoding {
            location: FaceBox { x1: 1.0, y1: 1.0, x2: 6.0, y2: 6.0, confidence: 0.9 },
            embedding: vec![1.0 - f32::from(OWNER) / 100.0, 0.0],
        }])
    }
}

pub fn reference() -> ReferenceEncoding {
    ReferenceEncoding::new(vec![1.0, 0.0], "reference.png")
}

pub fn matching(extract_every: u32) -> MatchingConfig {
    MatchingConfig { extract_every, ..MatchingConfig::default() }
}

pub fn settings(extract_every: u32) -> SessionSettings {
    SessionSettings {
        device_index: 0,
        matching: matching(extract_every),
        preview: PreviewConfig::default(),
    }
}

/// Keeps everything the control plane delivered.
#[derive(Debug, Default)]
pub struct Recorder {
    pub statuses: Vec<bool>,
    pub frames: Vec<u64>,
    pub ends: Vec<SessionEnd>,
}

impl Recorder {
    pub fn authenticated(&self) -> bool {
        self.statuses.last().copied().unwrap_or(false)
    }
}

impl Subscriber for Recorder {
    fn on_status_change(&mut self, authenticated: bool) {
        self.statuses.push(authenticated);
    }

    fn on_frame(&mut self, frame: PreviewFrame) {
        self.frames.push(frame.sequence);
    }

    fn on_session_end(&mut self, end: SessionEnd) {
        self.ends.push(end);
    }
}

/// Shared slot for values a worker callback reports back to the test.
pub type Captured<T> = Arc<Mutex<Vec<T>>>;
