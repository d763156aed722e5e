use crate::camera::CameraGuard;
use crate::common::config::MatchingConfig;
use crate::core::encoder::{face_distance, FaceEncoder};
use crate::core::publisher::FramePublisher;
use crate::core::reference::ReferenceEncoding;
use crate::core::session::{FrameSample, SessionEnd, SessionReport, Subscriber};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Lets extraction through on one frame out of every `every`, starting with
/// the first. Over `n` frames that is `ceil(n / every)` extractions.
#[derive(Debug, Clone)]
pub struct ExtractionThrottle {
    every: u64,
    seen: u64,
    admitted: u64,
}

impl ExtractionThrottle {
    pub fn new(every: u32) -> Self {
        Self { every: u64::from(every.max(1)), seen: 0, admitted: 0 }
    }

    pub fn admit(&mut self) -> bool {
        let admit = self.seen % self.every == 0;
        self.seen += 1;
        if admit {
            self.admitted += 1;
        }
        admit
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn admitted(&self) -> u64 {
        self.admitted
    }
}

/// A confirmed match, reported once per session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchEvent {
    pub sequence: u64,
    pub distance: f32,
}

/// The blocking acquire -> extract -> compare loop for one session.
pub struct CaptureWorker<S> {
    camera: CameraGuard,
    encoder: Arc<dyn FaceEncoder>,
    reference: ReferenceEncoding,
    publisher: FramePublisher<S>,
    cancel: Arc<AtomicBool>,
    tolerance: f32,
    throttle: ExtractionThrottle,
    max_consecutive_errors: u32,
}

impl<S: Subscriber + 'static> CaptureWorker<S> {
    pub fn new(
        camera: CameraGuard,
        encoder: Arc<dyn FaceEncoder>,
        reference: ReferenceEncoding,
        publisher: FramePublisher<S>,
        cancel: Arc<AtomicBool>,
        matching: &MatchingConfig,
    ) -> Self {
        Self {
            camera,
            encoder,
            reference,
            publisher,
            cancel,
            tolerance: matching.tolerance,
            throttle: ExtractionThrottle::new(matching.extract_every),
            max_consecutive_errors: matching.max_consecutive_frame_errors,
        }
    }

    /// Runs until stopped, matched, or the device gives out. `on_match` is
    /// called at most once, before the camera is released, and returns
    /// whether the match was accepted. A refused match ends the session as
    /// `Stopped`. The camera is released exactly once on every path out of
    /// here.
    pub fn run<F>(mut self, on_match: F) -> SessionReport
    where
        F: FnOnce(MatchEvent) -> bool,
    {
        let started = Instant::now();
        let mut on_match = Some(on_match);
        let mut sequence = 0u64;
        let mut consecutive_errors = 0u32;

        let end = loop {
            if self.cancel.load(Ordering::Acquire) {
                break SessionEnd::Stopped;
            }

            let image = match self.camera.read_frame() {
                Ok(Some(image)) => image,
                Ok(None) => {
                    tracing::info!("Camera stream ended after {} frames", sequence);
                    break SessionEnd::EndOfStream;
                }
                Err(e) if e.is_transient() => {
                    consecutive_errors += 1;
                    if consecutive_errors > self.max_consecutive_errors {
                        tracing::error!("Giving up after {} consecutive frame errors", consecutive_errors);
                        break SessionEnd::DeviceFailure(e.to_string());
                    }
                    tracing::warn!("Skipping frame: {}", e);
                    continue;
                }
                Err(e) => {
                    tracing::error!("Camera failed: {}", e);
                    break SessionEnd::DeviceFailure(e.to_string());
                }
            };
            consecutive_errors = 0;
            sequence += 1;
            let sample = FrameSample { sequence, image };

            let matched = if self.throttle.admit() {
                self.find_match(&sample)
            } else {
                None
            };

            let accepted = matched.map(|event| {
                tracing::info!(
                    "Face recognized on frame {} (distance {:.3})",
                    event.sequence, event.distance
                );
                let accepted = on_match.take().map_or(false, |notify| notify(event));
                (event, accepted)
            });

            self.publisher.publish(&sample);

            match accepted {
                Some((event, true)) => {
                    break SessionEnd::Matched { sequence: event.sequence, distance: event.distance };
                }
                Some((event, false)) => {
                    tracing::info!("Match on frame {} refused, session already stopped", event.sequence);
                    break SessionEnd::Stopped;
                }
                None => {}
            }
        };

        self.camera.release();
        tracing::info!(
            "Capture session ended: {:?} ({} frames, {} extractions, {:.1}s)",
            end,
            self.throttle.seen(),
            self.throttle.admitted(),
            started.elapsed().as_secs_f32()
        );

        SessionReport {
            end,
            frames: self.throttle.seen(),
            extractions: self.throttle.admitted(),
        }
    }

    /// First embedding in the frame within tolerance of the reference.
    fn find_match(&self, sample: &FrameSample) -> Option<MatchEvent> {
        let rgb = sample.image.to_rgb8();
        let faces = match self.encoder.encode(&rgb) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!("Extraction failed on frame {}: {}", sample.sequence, e);
                return None;
            }
        };

        let known = self.reference.embedding();
        faces.iter().find_map(|face| {
            if self.encoder.compare(known, &face.embedding, self.tolerance) {
                Some(MatchEvent {
                    sequence: sample.sequence,
                    distance: face_distance(known, &face.embedding),
                })
            } else {
                tracing::debug!(
                    "Frame {}: face at distance {:.3} rejected",
                    sample.sequence,
                    face_distance(known, &face.embedding)
                );
                None
            }
        })
    }
}
