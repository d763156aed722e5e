//! The authentication gate: owns the state machine and at most one capture
//! worker, and routes everything the subscriber sees through the hand-off.
//!
//! ```text
//!   Idle ──start()──▶ Running ──match──▶ Authenticated
//!                        │
//!                        └──stop() / end of stream / device failure──▶ Stopped
//!   Stopped ──start()──▶ Running
//! ```
//!
//! `Authenticated` is terminal. `start()` there only re-announces the status.

use crate::camera::{CameraGuard, CameraProvider};
use crate::common::{Config, FaceGateError, Result};
use crate::common::config::{MatchingConfig, PreviewConfig};
use crate::core::encoder::FaceEncoder;
use crate::core::handoff::HandOff;
use crate::core::publisher::FramePublisher;
use crate::core::reference::ReferenceEncoding;
use crate::core::session::{AuthenticationState, SessionEnd, SessionReport, Subscriber};
use crate::core::worker::{CaptureWorker, MatchEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

const WORKER_THREAD_NAME: &str = "facegate-capture";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new capture worker was spawned.
    Started,
    /// A worker is already active; nothing changed. This includes a worker
    /// that has been told to stop but has not finished its frame yet, so a
    /// restart right after `stop()` can land here while `state()` already
    /// reads `Stopped`. Retry once `on_session_end` has been delivered.
    AlreadyRunning,
    /// Already authenticated; the status was re-sent.
    AlreadyAuthenticated,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub device_index: u32,
    pub matching: MatchingConfig,
    pub preview: PreviewConfig,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            device_index: config.camera.device_index,
            matching: config.matching.clone(),
            preview: config.preview.clone(),
        }
    }
}

/// State shared with the worker thread.
struct Shared<S> {
    state: Mutex<AuthenticationState>,
    worker_active: AtomicBool,
    handoff: HandOff<S>,
}

impl<S: Subscriber + 'static> Shared<S> {
    /// Applies a match from the worker. Only a `Running` session can become
    /// `Authenticated`; anything else means the match lost a race with
    /// `stop()` and is dropped.
    fn accept_match(&self, event: MatchEvent) -> bool {
        let mut state = self.state.lock();
        if *state != AuthenticationState::Running {
            tracing::info!("Discarding match on frame {}: gate is {:?}", event.sequence, *state);
            return false;
        }
        *state = AuthenticationState::Authenticated;
        drop(state);

        tracing::info!("Access granted");
        self.handoff.submit(|subscriber: &mut S| subscriber.on_status_change(true));
        true
    }

    /// Settles the state after the worker loop returns and gives up the
    /// single-flight slot under the same lock, so a following `start()`
    /// cannot interleave with the transition.
    fn finish_session(&self, end: &SessionEnd, slot: &mut WorkerSlot<S>) {
        {
            let mut state = self.state.lock();
            if *state == AuthenticationState::Running {
                *state = AuthenticationState::Stopped;
            }
            slot.vacate();
        }

        let end = end.clone();
        self.handoff.submit(move |subscriber: &mut S| subscriber.on_session_end(end));
    }
}

/// Holds the single-flight flag for one worker and clears it on every exit,
/// including an unwinding one.
struct WorkerSlot<S: Subscriber + 'static> {
    shared: Arc<Shared<S>>,
    armed: bool,
}

impl<S: Subscriber + 'static> WorkerSlot<S> {
    fn claim(shared: Arc<Shared<S>>) -> Self {
        Self { shared, armed: true }
    }

    fn vacate(&mut self) {
        if self.armed {
            self.armed = false;
            self.shared.worker_active.store(false, Ordering::Release);
        }
    }
}

impl<S: Subscriber + 'static> Drop for WorkerSlot<S> {
    fn drop(&mut self) {
        self.vacate();
    }
}

struct ActiveSession {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<SessionReport>,
}

pub struct AuthenticationController<S: Subscriber + 'static> {
    reference: Option<ReferenceEncoding>,
    encoder: Arc<dyn FaceEncoder>,
    cameras: Arc<dyn CameraProvider>,
    settings: SessionSettings,
    shared: Arc<Shared<S>>,
    session: Mutex<Option<ActiveSession>>,
    sessions_started: AtomicU64,
}

impl<S: Subscriber + 'static> AuthenticationController<S> {
    pub fn new(
        reference: Option<ReferenceEncoding>,
        encoder: Arc<dyn FaceEncoder>,
        cameras: Arc<dyn CameraProvider>,
        settings: SessionSettings,
        handoff: HandOff<S>,
    ) -> Self {
        if reference.is_none() {
            tracing::warn!("No reference encoding loaded; start() will be refused");
        }

        Self {
            reference,
            encoder,
            cameras,
            settings,
            shared: Arc::new(Shared {
                state: Mutex::new(AuthenticationState::Idle),
                worker_active: AtomicBool::new(false),
                handoff,
            }),
            session: Mutex::new(None),
            sessions_started: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> AuthenticationState {
        *self.shared.state.lock()
    }

    pub fn is_worker_active(&self) -> bool {
        self.shared.worker_active.load(Ordering::Acquire)
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Number of capture workers spawned over the controller's lifetime.
    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    /// Starts a capture session.
    ///
    /// Fails with a configuration error when no reference is loaded and with
    /// a camera error when the device cannot be opened; in both cases no
    /// worker is spawned and the state is unchanged.
    ///
    /// The camera is opened on the calling thread so an open failure is
    /// returned here and the gate never reaches `Running`. That open blocks;
    /// with auto-detect it probes every `/dev/video*` node. Callers on an
    /// async control plane should expect `start()` to take as long as the
    /// device open does.
    pub fn start(&self) -> Result<StartOutcome> {
        if self.state() == AuthenticationState::Authenticated {
            tracing::info!("Already authenticated");
            self.shared
                .handoff
                .submit(|subscriber: &mut S| subscriber.on_status_change(true));
            return Ok(StartOutcome::AlreadyAuthenticated);
        }

        let reference = self.reference.clone().ok_or_else(|| {
            FaceGateError::Configuration("Cannot start authentication: no reference encoding".into())
        })?;

        if self
            .shared
            .worker_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Capture worker already active, start() ignored");
            return Ok(StartOutcome::AlreadyRunning);
        }
        // From here the flag is ours and must be handed back on failure
        let mut slot = WorkerSlot::claim(self.shared.clone());

        // A worker that finished between the first check and the claim may
        // have authenticated
        if self.state() == AuthenticationState::Authenticated {
            self.shared
                .handoff
                .submit(|subscriber: &mut S| subscriber.on_status_change(true));
            return Ok(StartOutcome::AlreadyAuthenticated);
        }

        let camera = self.cameras.open(self.settings.device_index)?;
        let camera = CameraGuard::new(camera);

        let cancel = Arc::new(AtomicBool::new(false));
        let worker = CaptureWorker::new(
            camera,
            self.encoder.clone(),
            reference,
            FramePublisher::new(self.shared.handoff.clone(), &self.settings.preview),
            cancel.clone(),
            &self.settings.matching,
        );

        // Held across the spawn so a concurrent stop() always finds the
        // cancel token of the worker it is stopping
        let mut session = self.session.lock();
        if let Some(old) = session.take() {
            // Already finished; its slot is vacated
            let _ = old.thread.join();
        }

        let previous = std::mem::replace(&mut *self.shared.state.lock(), AuthenticationState::Running);

        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || {
                let report = worker.run(|event| shared.accept_match(event));
                shared.finish_session(&report.end, &mut slot);
                report
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                // The closure went down with the camera guard and the slot
                *self.shared.state.lock() = previous;
                return Err(FaceGateError::Io(e));
            }
        };
        *session = Some(ActiveSession { cancel, thread });
        drop(session);
        self.sessions_started.fetch_add(1, Ordering::Relaxed);

        tracing::info!("Authentication started on camera {}", self.settings.device_index);
        Ok(StartOutcome::Started)
    }

    /// Asks the worker to stop after its current frame. Idempotent.
    pub fn stop(&self) {
        if let Some(session) = self.session.lock().as_ref() {
            session.cancel.store(true, Ordering::Release);
        }

        let mut state = self.shared.state.lock();
        if *state == AuthenticationState::Running {
            *state = AuthenticationState::Stopped;
            tracing::info!("Authentication stopped");
        }
    }

    /// Blocks until the current worker thread exits. `None` if no session
    /// was ever started or it has already been joined.
    pub fn join_worker(&self) -> Option<SessionReport> {
        let session = self.session.lock().take()?;
        match session.thread.join() {
            Ok(report) => Some(report),
            Err(_) => {
                tracing::error!("Capture worker panicked");
                None
            }
        }
    }
}

impl<S: Subscriber + 'static> Drop for AuthenticationController<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.store(true, Ordering::Release);
            let _ = session.thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handoff::ControlPlane;
    use crate::core::session::PreviewFrame;

    #[derive(Default)]
    struct Statuses(Vec<bool>);

    impl Subscriber for Statuses {
        fn on_status_change(&mut self, authenticated: bool) {
            self.0.push(authenticated);
        }

        fn on_frame(&mut self, _frame: PreviewFrame) {}
    }

    fn fixture(state: AuthenticationState) -> (Arc<Shared<Statuses>>, ControlPlane<Statuses>) {
        let (plane, handoff) = ControlPlane::new(Statuses::default());
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            worker_active: AtomicBool::new(true),
            handoff,
        });
        (shared, plane)
    }

    const EVENT: MatchEvent = MatchEvent { sequence: 3, distance: 0.4 };

    #[test]
    fn match_while_running_authenticates_once() {
        let (shared, mut plane) = fixture(AuthenticationState::Running);

        assert!(shared.accept_match(EVENT));
        assert!(!shared.accept_match(EVENT));

        assert_eq!(*shared.state.lock(), AuthenticationState::Authenticated);
        plane.run_pending();
        assert_eq!(plane.subscriber().0, vec![true]);
    }

    #[test]
    fn match_after_stop_is_discarded() {
        let (shared, mut plane) = fixture(AuthenticationState::Stopped);

        assert!(!shared.accept_match(EVENT));

        assert_eq!(*shared.state.lock(), AuthenticationState::Stopped);
        assert_eq!(plane.run_pending(), 0);
    }

    #[test]
    fn finishing_never_leaves_authenticated() {
        let (shared, mut plane) = fixture(AuthenticationState::Authenticated);
        let mut slot = WorkerSlot::claim(shared.clone());
        shared.finish_session(&SessionEnd::EndOfStream, &mut slot);

        assert_eq!(*shared.state.lock(), AuthenticationState::Authenticated);
        assert!(!shared.worker_active.load(Ordering::Acquire));
        assert_eq!(plane.run_pending(), 1);
    }

    #[test]
    fn finishing_a_running_session_stops_it() {
        let (shared, _plane) = fixture(AuthenticationState::Running);
        let mut slot = WorkerSlot::claim(shared.clone());
        shared.finish_session(&SessionEnd::DeviceFailure("unplugged".into()), &mut slot);

        assert_eq!(*shared.state.lock(), AuthenticationState::Stopped);
    }

    #[test]
    fn vacated_slot_does_not_clear_a_later_claim() {
        let (shared, _plane) = fixture(AuthenticationState::Running);
        let mut slot = WorkerSlot::claim(shared.clone());
        slot.vacate();

        // A new worker claims the flag before the old slot is dropped
        shared.worker_active.store(true, Ordering::Release);
        drop(slot);
        assert!(shared.worker_active.load(Ordering::Acquire));
    }

    #[test]
    fn dropped_slot_clears_flag() {
        let (shared, _plane) = fixture(AuthenticationState::Running);
        drop(WorkerSlot::claim(shared.clone()));
        assert!(!shared.worker_active.load(Ordering::Acquire));
    }
}
