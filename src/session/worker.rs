//! Two-thread capture session.
//!
//! The analysis worker owns the engine and all card state. Stills are
//! validated on a second thread which posts its verdict back into the
//! analysis worker's command channel, so every state change happens on
//! one thread.
//!
//! Live frames travel on their own channel with room for one frame. A
//! frame offered while that slot is taken is skipped, never queued.

use super::{CardSession, SessionError};
use crate::capture::{CaptureCapability, CaptureStep, FocusCapability, Frame};
use crate::dataset::{CaptureIdGenerator, CardRecord, Grade, SequenceCounter, StagingPaths};
use crate::engine::{CaptureEngine, EngineEvent, EngineStats, Hint, TextScanner};
use crate::upload::{JobStore, UploadQueue};
use crate::validation::{PhotoValidator, ValidationResult};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Input to the analysis worker.
#[derive(Debug)]
pub enum SessionCommand {
    /// Grade for the photo awaiting one.
    Grade(Grade),
    Recalibrate,
    /// Drop the current card and start over from the FRONT.
    Reset,
    /// Posted by the validator thread.
    Validated {
        step: CaptureStep,
        path: PathBuf,
        result: ValidationResult,
    },
    Shutdown,
}

/// Output of the analysis worker.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Engine(EngineEvent),
    Hint(Hint),
    PhotoAccepted { step: CaptureStep, path: PathBuf },
    PhotoRejected { step: CaptureStep, result: ValidationResult },
    Graded { step: CaptureStep, grade: Grade },
    CardQueued { job_id: u64, record: CardRecord },
    RecalibrateRefused,
    Error(String),
}

/// Counters published after every command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub engine: EngineStats,
    /// Live frames skipped because one was already waiting.
    pub frames_skipped: u64,
    pub photos_accepted: u64,
    pub photos_rejected: u64,
    pub capture_failures: u64,
    pub cards_queued: u64,
}

#[derive(Debug)]
struct ValidationRequest {
    step: CaptureStep,
    path: PathBuf,
}

/// Everything a session needs, moved onto the analysis thread.
pub struct SessionSetup<P: TextScanner, C, S> {
    pub engine: CaptureEngine<P>,
    pub ids: CaptureIdGenerator<C>,
    pub staging: StagingPaths,
    pub queue: UploadQueue<S>,
    pub camera: Box<dyn CaptureCapability + Send>,
    pub focus: Box<dyn FocusCapability + Send>,
    pub validator: PhotoValidator,
}

/// State owned by the analysis thread.
pub struct SessionWorker<P: TextScanner, C, S> {
    engine: CaptureEngine<P>,
    card: CardSession,
    ids: CaptureIdGenerator<C>,
    staging: StagingPaths,
    queue: UploadQueue<S>,
    camera: Box<dyn CaptureCapability + Send>,
    focus: Box<dyn FocusCapability + Send>,
    validate: Option<Sender<ValidationRequest>>,
    events: Sender<SessionEvent>,
    stats: SessionStats,
    shared: Arc<Mutex<SessionStats>>,
    skipped: Arc<AtomicU64>,
}

impl<P: TextScanner, C: SequenceCounter, S: JobStore> SessionWorker<P, C, S> {
    pub fn engine(&self) -> &CaptureEngine<P> {
        &self.engine
    }

    pub fn card(&self) -> &CardSession {
        &self.card
    }

    pub fn queue(&self) -> &UploadQueue<S> {
        &self.queue
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            engine: self.engine.stats(),
            frames_skipped: self.skipped.load(Ordering::Relaxed),
            ..self.stats
        }
    }

    fn run(mut self, commands: Receiver<SessionCommand>, frames: Receiver<Frame>) -> Self {
        loop {
            let keep_going = crossbeam::select! {
                recv(commands) -> command => match command {
                    Ok(command) => self.handle(command),
                    Err(_) => false,
                },
                recv(frames) -> frame => match frame {
                    Ok(frame) => {
                        self.on_frame(&frame);
                        true
                    }
                    Err(_) => false,
                },
            };
            self.publish_stats();
            if !keep_going {
                break;
            }
        }
        // Closing the request channel stops the validator thread.
        self.validate = None;
        tracing::debug!("Analysis worker stopped");
        self
    }

    fn handle(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Validated { step, path, result } => self.on_validated(step, path, result),
            SessionCommand::Grade(grade) => self.on_grade(grade),
            SessionCommand::Recalibrate => {
                let step = self.engine.step();
                if self.engine.request_recalibrate(step) {
                    self.emit(SessionEvent::Hint(Hint::Calibrating { step }));
                } else {
                    self.emit(SessionEvent::RecalibrateRefused);
                }
            }
            SessionCommand::Reset => self.reset(),
            SessionCommand::Shutdown => return false,
        }
        true
    }

    fn on_frame(&mut self, frame: &Frame) {
        let mut events = Vec::<EngineEvent>::new();
        self.engine.analyze(frame, &mut events);
        for event in events {
            let action = event.clone();
            self.emit(SessionEvent::Engine(event));
            match action {
                EngineEvent::TriggerCapture { step } => self.capture(step),
                EngineEvent::RequestFocus { point } => self.focus.request_focus(point),
                _ => {}
            }
        }
    }

    fn capture(&mut self, step: CaptureStep) {
        let path = match self.card.photo_path(step, &mut self.ids, &self.staging) {
            Ok(path) => path,
            Err(e) => return self.capture_failed(step, e.to_string()),
        };
        if let Err(e) = self.camera.capture_still(step, &path) {
            StagingPaths::discard(&path);
            return self.capture_failed(step, e.to_string());
        }

        self.engine.set_analyzing(true);
        let sent = self
            .validate
            .as_ref()
            .is_some_and(|tx| tx.send(ValidationRequest { step, path: path.clone() }).is_ok());
        if !sent {
            StagingPaths::discard(&path);
            self.capture_failed(step, "validator is not running".into());
        }
    }

    fn capture_failed(&mut self, step: CaptureStep, error: String) {
        tracing::warn!(step = %step, error = %error, "Still capture failed");
        self.stats.capture_failures += 1;
        self.engine.on_capture_failed();
        self.emit(SessionEvent::Hint(Hint::CaptureFailed(error)));
    }

    fn on_validated(&mut self, step: CaptureStep, path: PathBuf, result: ValidationResult) {
        if step != self.engine.step() || !self.engine.runtime().analyzing {
            tracing::debug!(step = %step, path = %path.display(), "Dropping stale validation result");
            StagingPaths::discard(&path);
            return;
        }

        if result.accepted {
            if let Some(old) = self.card.set_photo(step, path.clone()) {
                if old != path {
                    StagingPaths::discard(&old);
                }
            }
            self.engine.lock_for_labeling();
            self.stats.photos_accepted += 1;
            tracing::info!(step = %step, path = %path.display(), "Photo accepted");
            self.emit(SessionEvent::PhotoAccepted { step, path });
        } else {
            StagingPaths::discard(&path);
            self.engine.rearm();
            self.stats.photos_rejected += 1;
            if let Some(hint) = result.reason.hint() {
                self.emit(SessionEvent::Hint(hint));
            }
            self.emit(SessionEvent::PhotoRejected { step, result });
        }
    }

    fn on_grade(&mut self, grade: Grade) {
        let Some(step) = self.card.awaiting_grade() else {
            self.emit(SessionEvent::Error("no photo is waiting for a grade".into()));
            return;
        };
        if let Err(e) = self.card.set_grade(step, grade) {
            self.emit(SessionEvent::Error(e.to_string()));
            return;
        }
        self.emit(SessionEvent::Graded { step, grade });

        match step.next() {
            Some(next) => {
                self.engine.mark_capture_finished();
                if self.engine.advance_to(next) {
                    self.emit(SessionEvent::Hint(Hint::Calibrating { step: next }));
                } else {
                    self.emit(SessionEvent::Error(format!("could not advance to {next}")));
                }
            }
            None => self.finish_card(),
        }
    }

    fn finish_card(&mut self) {
        let now = chrono::Utc::now().timestamp_millis();
        let queued = self
            .card
            .finalize(self.ids.device(), now)
            .and_then(|record| {
                record.write_meta(&self.staging)?;
                let job_id = self.queue.enqueue(&record, now)?;
                Ok((job_id, record))
            });

        match queued {
            Ok((job_id, record)) => {
                self.card = CardSession::new();
                self.stats.cards_queued += 1;
                self.engine.reset_session();
                self.emit(SessionEvent::CardQueued { job_id, record });
            }
            Err(e) => {
                // Back to awaiting the BACK grade; grading again retries.
                self.card.clear_grade(CaptureStep::Back);
                tracing::warn!(error = %e, "Failed to queue card");
                self.emit(SessionEvent::Error(e.to_string()));
            }
        }
    }

    fn reset(&mut self) {
        for path in self.card.clear() {
            StagingPaths::discard(&path);
        }
        self.engine.reset_session();
        tracing::info!("Card session reset");
        self.emit(SessionEvent::Hint(Hint::Calibrating {
            step: CaptureStep::Front,
        }));
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Session event dropped; no listener");
        }
    }

    fn publish_stats(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            *shared = self.stats();
        }
    }
}

fn run_validator(
    validator: PhotoValidator,
    requests: Receiver<ValidationRequest>,
    reply: Sender<SessionCommand>,
) {
    for ValidationRequest { step, path } in requests {
        let result = validator.validate_file(&path, step);
        if reply.send(SessionCommand::Validated { step, path, result }).is_err() {
            break;
        }
    }
    tracing::debug!("Validator worker stopped");
}

/// Handle to a running session.
pub struct SessionRuntime<P: TextScanner, C, S> {
    commands: Sender<SessionCommand>,
    frames: Sender<Frame>,
    events: Receiver<SessionEvent>,
    stats: Arc<Mutex<SessionStats>>,
    skipped: Arc<AtomicU64>,
    worker: Option<JoinHandle<SessionWorker<P, C, S>>>,
    validator: Option<JoinHandle<()>>,
}

impl<P, C, S> SessionRuntime<P, C, S>
where
    P: TextScanner + Send + 'static,
    C: SequenceCounter + Send + 'static,
    S: JobStore + Send + 'static,
{
    /// Starts the analysis and validator threads.
    pub fn spawn(setup: SessionSetup<P, C, S>) -> Result<Self, SessionError> {
        let (command_tx, command_rx) = channel::unbounded();
        let (frame_tx, frame_rx) = channel::bounded(1);
        let (event_tx, event_rx) = channel::unbounded();
        let (validate_tx, validate_rx) = channel::unbounded();
        let stats = Arc::new(Mutex::new(SessionStats::default()));
        let skipped = Arc::new(AtomicU64::new(0));

        let SessionSetup {
            engine,
            ids,
            staging,
            queue,
            camera,
            focus,
            validator,
        } = setup;

        let reply = command_tx.clone();
        let validator = std::thread::Builder::new()
            .name("photo-validator".into())
            .spawn(move || run_validator(validator, validate_rx, reply))
            .map_err(SessionError::Spawn)?;

        let worker = SessionWorker {
            engine,
            card: CardSession::new(),
            ids,
            staging,
            queue,
            camera,
            focus,
            validate: Some(validate_tx),
            events: event_tx,
            stats: SessionStats::default(),
            shared: Arc::clone(&stats),
            skipped: Arc::clone(&skipped),
        };
        let worker = std::thread::Builder::new()
            .name("frame-analysis".into())
            .spawn(move || worker.run(command_rx, frame_rx))
            .map_err(SessionError::Spawn)?;

        tracing::info!("Capture session started");
        Ok(Self {
            commands: command_tx,
            frames: frame_tx,
            events: event_rx,
            stats,
            skipped,
            worker: Some(worker),
            validator: Some(validator),
        })
    }
}

impl<P: TextScanner, C, S> SessionRuntime<P, C, S> {
    /// Queues a command. Returns `false` once the worker is gone.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Offers a live frame without blocking. The frame is skipped and
    /// counted while the worker still has one waiting. Returns `false`
    /// once the worker is gone.
    pub fn send_frame(&self, frame: Frame) -> bool {
        match self.frames.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(seq = frame.sequence(), "Analysis busy; frame skipped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Hands over a recorded frame, waiting until the worker takes it.
    pub fn replay_frame(&self, frame: Frame) -> bool {
        self.frames.send(frame).is_ok()
    }

    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// Latest published counters.
    pub fn stats(&self) -> SessionStats {
        let stats = self.stats.lock().map(|s| *s).unwrap_or_default();
        SessionStats {
            frames_skipped: self.skipped.load(Ordering::Relaxed),
            ..stats
        }
    }

    /// Stops both threads and hands back the worker state.
    pub fn shutdown(mut self) -> Result<SessionWorker<P, C, S>, SessionError> {
        let _ = self.commands.send(SessionCommand::Shutdown);
        let worker = self
            .worker
            .take()
            .ok_or(SessionError::WorkerPanicked("frame-analysis"))?
            .join()
            .map_err(|_| SessionError::WorkerPanicked("frame-analysis"))?;
        if let Some(validator) = self.validator.take() {
            validator
                .join()
                .map_err(|_| SessionError::WorkerPanicked("photo-validator"))?;
        }
        Ok(worker)
    }
}

impl<P: TextScanner, C, S> Drop for SessionRuntime<P, C, S> {
    fn drop(&mut self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(validator) = self.validator.take() {
            let _ = validator.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureConfig, MockFrameSource, MockStillCamera, NoopFocus, SceneSegment};
    use crate::capture::FrameSource;
    use crate::dataset::MemoryCounter;
    use crate::upload::{JobStatus, MemoryJobStore, QueueError, UploadJob};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(20);

    fn config() -> CaptureConfig {
        CaptureConfig {
            sample_stride: 4,
            grid_size: 8,
            bg_calib_need_frames: 10,
            need_present_frames: 3,
            need_stable_frames: 3,
            need_stable_ms: 200,
            ..CaptureConfig::default()
        }
    }

    /// Memory store whose inserts fail while `broken` is set.
    #[derive(Default)]
    struct BrokenStore {
        inner: MemoryJobStore,
        broken: Arc<AtomicBool>,
    }

    impl JobStore for BrokenStore {
        fn insert(&mut self, job: UploadJob) -> Result<u64, QueueError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(QueueError::Io(std::io::Error::other("disk full")));
            }
            self.inner.insert(job)
        }

        fn get(&self, id: u64) -> Result<Option<UploadJob>, QueueError> {
            self.inner.get(id)
        }

        fn update(&mut self, job: &UploadJob) -> Result<(), QueueError> {
            self.inner.update(job)
        }

        fn all(&self) -> Result<Vec<UploadJob>, QueueError> {
            self.inner.all()
        }

        fn remove_where(&mut self, pred: &dyn Fn(&UploadJob) -> bool) -> Result<usize, QueueError> {
            self.inner.remove_where(pred)
        }
    }

    fn spawn(
        root: &std::path::Path,
        camera: MockStillCamera,
    ) -> SessionRuntime<crate::engine::NullTextScanner, MemoryCounter, MemoryJobStore> {
        spawn_with(root, camera, MemoryJobStore::new())
    }

    fn spawn_with<S: JobStore + Send + 'static>(
        root: &std::path::Path,
        camera: MockStillCamera,
        store: S,
    ) -> SessionRuntime<crate::engine::NullTextScanner, MemoryCounter, S> {
        SessionRuntime::spawn(SessionSetup {
            engine: CaptureEngine::new(config()),
            ids: CaptureIdGenerator::new("test-device", MemoryCounter::default()),
            staging: StagingPaths::new(root),
            queue: UploadQueue::new(store),
            camera: Box::new(camera),
            focus: Box::new(NoopFocus),
            validator: PhotoValidator::default(),
        })
        .unwrap()
    }

    fn feed<P: TextScanner, S>(
        session: &SessionRuntime<P, MemoryCounter, S>,
        clock: &mut u64,
        script: Vec<SceneSegment>,
    ) {
        let frames: u32 = script.iter().map(|s| s.frames).sum();
        let mut source = MockFrameSource::new(160, 120, 25, script);
        for _ in 0..frames {
            let frame = source.next_frame().unwrap().with_timestamp_ms(*clock);
            *clock += 40;
            session.replay_frame(frame);
        }
    }

    fn wait_for<P: TextScanner, S, F: Fn(&SessionEvent) -> bool>(
        session: &SessionRuntime<P, MemoryCounter, S>,
        pred: F,
    ) -> SessionEvent {
        loop {
            let event = session.events().recv_timeout(WAIT).unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    #[test]
    fn test_full_card_is_queued() {
        let dir = tempfile::tempdir().unwrap();
        let session = spawn(dir.path(), MockStillCamera::new(640, 480));
        let mut clock = 0;

        feed(&session, &mut clock, vec![SceneSegment::empty(12), SceneSegment::card(30)]);
        let front = wait_for(&session, |e| matches!(e, SessionEvent::PhotoAccepted { .. }));
        let SessionEvent::PhotoAccepted { step, path } = front else { unreachable!() };
        assert_eq!(step, CaptureStep::Front);
        assert!(path.is_file());

        session.send(SessionCommand::Grade(Grade::NearMint));
        feed(&session, &mut clock, vec![SceneSegment::empty(14), SceneSegment::card(30)]);
        let back = wait_for(&session, |e| matches!(e, SessionEvent::PhotoAccepted { .. }));
        assert!(matches!(back, SessionEvent::PhotoAccepted { step: CaptureStep::Back, .. }));

        session.send(SessionCommand::Grade(Grade::ModeratelyPlayed));
        let queued = wait_for(&session, |e| matches!(e, SessionEvent::CardQueued { .. }));
        let SessionEvent::CardQueued { job_id, record } = queued else { unreachable!() };
        assert_eq!(record.final_grade, Grade::ModeratelyPlayed);
        assert!(record.base_id.ends_with("_test-device_000001"));
        assert!(record.back_path.is_file());

        let worker = session.shutdown().unwrap();
        let job = worker.queue().get(job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(worker.stats().cards_queued, 1);
        assert_eq!(worker.engine().step(), CaptureStep::Front);
        assert!(worker.engine().runtime().is_calibrating());
    }

    #[test]
    fn test_failed_enqueue_keeps_card_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let store = BrokenStore::default();
        let broken = Arc::clone(&store.broken);
        broken.store(true, Ordering::SeqCst);
        let session = spawn_with(dir.path(), MockStillCamera::new(640, 480), store);
        let mut clock = 0;

        feed(&session, &mut clock, vec![SceneSegment::empty(12), SceneSegment::card(30)]);
        wait_for(&session, |e| matches!(e, SessionEvent::PhotoAccepted { .. }));
        session.send(SessionCommand::Grade(Grade::NearMint));
        feed(&session, &mut clock, vec![SceneSegment::empty(14), SceneSegment::card(30)]);
        wait_for(&session, |e| {
            matches!(e, SessionEvent::PhotoAccepted { step: CaptureStep::Back, .. })
        });

        session.send(SessionCommand::Grade(Grade::SlightlyPlayed));
        let err = wait_for(&session, |e| matches!(e, SessionEvent::Error(_)));
        assert_eq!(err, SessionEvent::Error("queue I/O error: disk full".into()));

        broken.store(false, Ordering::SeqCst);
        session.send(SessionCommand::Grade(Grade::SlightlyPlayed));
        let queued = wait_for(&session, |e| matches!(e, SessionEvent::CardQueued { .. }));
        let SessionEvent::CardQueued { record, .. } = queued else { unreachable!() };
        assert_eq!(record.final_grade, Grade::SlightlyPlayed);
        assert!(record.front_path.is_file());
        assert!(record.back_path.is_file());

        let worker = session.shutdown().unwrap();
        assert_eq!(worker.stats().cards_queued, 1);
        assert!(!worker.engine().runtime().capture_in_progress);
        assert!(worker.engine().runtime().is_calibrating());
    }

    #[test]
    fn test_frames_skipped_while_worker_busy() {
        let dir = tempfile::tempdir().unwrap();
        let session = spawn(dir.path(), MockStillCamera::new(640, 480));
        let frame = |seq: u64| Frame::uniform(120, 160, 120, seq).with_timestamp_ms(seq * 40);

        // Holding the stats lock parks the worker after its next frame.
        let guard = session.stats.lock().unwrap();
        assert!(session.send_frame(frame(0)));
        while !session.frames.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(session.send_frame(frame(1)));
        assert!(session.send_frame(frame(2)));
        assert!(session.send_frame(frame(3)));
        assert_eq!(session.skipped.load(Ordering::Relaxed), 2);
        drop(guard);
        while !session.frames.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }

        let worker = session.shutdown().unwrap();
        let stats = worker.stats();
        assert_eq!(stats.frames_skipped, 2);
        assert_eq!(stats.engine.frames_analyzed, 2);
    }

    #[test]
    fn test_recalibrate_refused_while_labeling() {
        let dir = tempfile::tempdir().unwrap();
        let session = spawn(dir.path(), MockStillCamera::new(640, 480));
        let mut clock = 0;

        feed(&session, &mut clock, vec![SceneSegment::empty(12), SceneSegment::card(30)]);
        wait_for(&session, |e| matches!(e, SessionEvent::PhotoAccepted { .. }));

        session.send(SessionCommand::Recalibrate);
        wait_for(&session, |e| matches!(e, SessionEvent::RecalibrateRefused));

        session.send(SessionCommand::Reset);
        wait_for(&session, |e| {
            matches!(e, SessionEvent::Hint(Hint::Calibrating { step: CaptureStep::Front }))
        });
        let worker = session.shutdown().unwrap();
        assert_eq!(worker.card(), &CardSession::new());
        assert!(std::fs::read_dir(dir.path().join("staging/images")).unwrap().next().is_none());
    }

    #[test]
    fn test_capture_failure_recalibrates() {
        let dir = tempfile::tempdir().unwrap();
        let mut camera = MockStillCamera::new(640, 480);
        camera.fail_next = 1;
        let session = spawn(dir.path(), camera);
        let mut clock = 0;

        feed(&session, &mut clock, vec![SceneSegment::empty(12), SceneSegment::card(20)]);
        let hint = wait_for(&session, |e| matches!(e, SessionEvent::Hint(Hint::CaptureFailed(_))));
        assert!(matches!(hint, SessionEvent::Hint(Hint::CaptureFailed(msg)) if msg.contains("simulated")));

        let worker = session.shutdown().unwrap();
        assert_eq!(worker.stats().capture_failures, 1);
    }

    #[test]
    fn test_grade_without_photo_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let session = spawn(dir.path(), MockStillCamera::new(640, 480));
        session.send(SessionCommand::Grade(Grade::Damaged));
        assert!(matches!(
            session.events().recv_timeout(WAIT).unwrap(),
            SessionEvent::Error(_)
        ));
    }
}
