pub mod v4l2;

pub use v4l2::{V4lCamera, V4lCameraProvider, CameraInfo};

use crate::common::Result;
use image::DynamicImage;

/// An opened capture device.
pub trait Camera: Send {
    /// Next frame, or `None` once the stream has ended.
    ///
    /// `FaceGateError::TransientFrame` marks a single bad read; any other
    /// error means the device is gone.
    fn read_frame(&mut self) -> Result<Option<DynamicImage>>;

    /// Gives the device back to the system.
    fn release(&mut self) {}
}

pub trait CameraProvider: Send + Sync {
    fn open(&self, device_index: u32) -> Result<Box<dyn Camera>>;
}

/// Owns an opened camera and releases it exactly once, either explicitly or
/// when dropped.
pub struct CameraGuard {
    camera: Option<Box<dyn Camera>>,
}

impl CameraGuard {
    pub fn new(camera: Box<dyn Camera>) -> Self {
        Self { camera: Some(camera) }
    }

    pub fn read_frame(&mut self) -> Result<Option<DynamicImage>> {
        match self.camera.as_mut() {
            Some(camera) => camera.read_frame(),
            None => Ok(None),
        }
    }

    pub fn is_released(&self) -> bool {
        self.camera.is_none()
    }

    pub fn release(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.release();
            tracing::debug!("Camera released");
        }
    }
}

impl Drop for CameraGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingCamera {
        releases: Arc<AtomicUsize>,
    }

    impl Camera for CountingCamera {
        fn read_frame(&mut self) -> Result<Option<DynamicImage>> {
            Ok(Some(DynamicImage::new_rgb8(2, 2)))
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn releases_once_across_explicit_release_and_drop() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut guard = CameraGuard::new(Box::new(CountingCamera { releases: releases.clone() }));

        assert!(guard.read_frame().unwrap().is_some());
        guard.release();
        guard.release();
        assert!(guard.is_released());
        assert!(guard.read_frame().unwrap().is_none());
        drop(guard);

        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases() {
        let releases = Arc::new(AtomicUsize::new(0));
        {
            let _guard = CameraGuard::new(Box::new(CountingCamera { releases: releases.clone() }));
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
