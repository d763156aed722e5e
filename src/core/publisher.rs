use crate::common::config::PreviewConfig;
use crate::common::{FaceGateError, Result};
use crate::core::handoff::HandOff;
use crate::core::session::{FrameSample, PreviewFrame, Subscriber};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ColorType;

/// Best-effort preview emission. Never fails the caller.
pub struct FramePublisher<S> {
    handoff: HandOff<S>,
    config: PreviewConfig,
}

impl<S: Subscriber + 'static> FramePublisher<S> {
    pub fn new(handoff: HandOff<S>, config: &PreviewConfig) -> Self {
        Self { handoff, config: config.clone() }
    }

    pub fn publish(&self, sample: &FrameSample) {
        if !self.config.enabled {
            return;
        }

        let preview = match render_preview(sample, self.config.scale, self.config.jpeg_quality) {
            Ok(preview) => preview,
            Err(e) => {
                tracing::warn!("Preview for frame {} dropped: {}", sample.sequence, e);
                return;
            }
        };

        if !self.handoff.submit(move |subscriber: &mut S| subscriber.on_frame(preview)) {
            tracing::debug!("Control plane gone, preview for frame {} dropped", sample.sequence);
        }
    }
}

/// Downsamples by `scale` and encodes as JPEG.
pub fn render_preview(sample: &FrameSample, scale: f32, quality: u8) -> Result<PreviewFrame> {
    let (width, height) = (sample.image.width(), sample.image.height());
    if width == 0 || height == 0 {
        return Err(FaceGateError::Preview(format!("empty {}x{} frame", width, height)));
    }

    let target_w = ((width as f32 * scale) as u32).max(1);
    let target_h = ((height as f32 * scale) as u32).max(1);
    let small = sample.image.resize_exact(target_w, target_h, FilterType::Triangle).to_rgb8();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode(small.as_raw(), target_w, target_h, ColorType::Rgb8)
        .map_err(|e| FaceGateError::Preview(e.to_string()))?;

    Ok(PreviewFrame { sequence: sample.sequence, width: target_w, height: target_h, jpeg })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handoff::ControlPlane;
    use image::DynamicImage;

    #[derive(Default)]
    struct Frames(Vec<PreviewFrame>);

    impl Subscriber for Frames {
        fn on_status_change(&mut self, _authenticated: bool) {}

        fn on_frame(&mut self, frame: PreviewFrame) {
            self.0.push(frame);
        }
    }

    fn sample(sequence: u64, width: u32, height: u32) -> FrameSample {
        FrameSample { sequence, image: DynamicImage::new_rgb8(width, height) }
    }

    #[test]
    fn halves_resolution_and_emits_jpeg() {
        let preview = render_preview(&sample(3, 64, 48), 0.5, 80).unwrap();
        assert_eq!((preview.width, preview.height), (32, 24));
        assert_eq!(preview.sequence, 3);
        assert_eq!(&preview.jpeg[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn tiny_frames_keep_at_least_one_pixel() {
        let preview = render_preview(&sample(1, 1, 1), 0.5, 80).unwrap();
        assert_eq!((preview.width, preview.height), (1, 1));
    }

    #[test]
    fn publish_hands_frame_to_subscriber() {
        let (mut plane, handoff) = ControlPlane::new(Frames::default());
        let publisher = FramePublisher::new(handoff, &PreviewConfig::default());

        publisher.publish(&sample(1, 16, 16));
        publisher.publish(&sample(2, 16, 16));

        assert_eq!(plane.run_pending(), 2);
        let sequences: Vec<u64> = plane.subscriber().0.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn encode_failures_are_swallowed() {
        let (mut plane, handoff) = ControlPlane::new(Frames::default());
        let publisher = FramePublisher::new(handoff, &PreviewConfig::default());

        publisher.publish(&sample(1, 0, 0));
        assert_eq!(plane.run_pending(), 0);
    }

    #[test]
    fn publishing_after_control_plane_dropped_is_harmless() {
        let (plane, handoff) = ControlPlane::new(Frames::default());
        let publisher = FramePublisher::new(handoff, &PreviewConfig::default());
        drop(plane);

        publisher.publish(&sample(1, 8, 8));
    }

    #[test]
    fn disabled_preview_publishes_nothing() {
        let (mut plane, handoff) = ControlPlane::new(Frames::default());
        let config = PreviewConfig { enabled: false, ..PreviewConfig::default() };
        let publisher = FramePublisher::new(handoff, &config);

        publisher.publish(&sample(1, 8, 8));
        assert_eq!(plane.run_pending(), 0);
    }
}
