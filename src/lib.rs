pub mod core;
pub mod camera;
pub mod cli;
pub mod common;

pub use common::{Config, FaceGateError, Result};
pub use core::{
    AuthenticationController, AuthenticationState, ControlPlane, FaceEncoder, HandOff,
    PreviewFrame, ReferenceEncoding, ReferenceStore, SessionEnd, SessionSettings, StartOutcome,
    Subscriber,
};
pub use camera::{Camera, CameraGuard, CameraProvider};
