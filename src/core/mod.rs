pub mod controller;
pub mod detector;
pub mod encoder;
pub mod handoff;
pub mod publisher;
pub mod recognizer;
pub mod reference;
pub mod session;
pub mod worker;

pub use controller::{AuthenticationController, SessionSettings, StartOutcome};
pub use detector::{FaceBox, FaceDetector};
pub use encoder::{face_distance, FaceEncoder, FaceEncoding, OnnxFaceEncoder};
pub use handoff::{ControlPlane, HandOff};
pub use publisher::{render_preview, FramePublisher};
pub use recognizer::{Embedding, FaceRecognizer};
pub use reference::{ReferenceEncoding, ReferenceStore};
pub use session::{
    AuthenticationState, FrameSample, PreviewFrame, SessionEnd, SessionReport, StatusEvent,
    Subscriber,
};
pub use worker::{CaptureWorker, ExtractionThrottle, MatchEvent};
