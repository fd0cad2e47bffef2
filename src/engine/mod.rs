//! Capture decision engine.
//!
//! Consumes analysis frames one at a time and decides when a card is
//! present, still and sharp enough to photograph. All decision state
//! lives in the engine and is owned by whichever thread runs
//! [`CaptureEngine::analyze`]; other workers reach it through messages
//! handled on that thread.
//!
//! Per frame, in order:
//!
//! 1. Drop the frame while a capture is running.
//! 2. Summarize the frame and score motion against the previous one.
//! 3. Obstructed lens: reset counters, hint, stop.
//! 4. Calibrating: accumulate still, empty frames into the baseline.
//! 5. Awaiting a swap: wait for the scene to return to the baseline.
//! 6. Presence, stability and focus; trigger when every gate is open.

mod background;
mod events;
mod presence;
mod runtime;
mod stability;
mod text_gate;

pub use background::{BackgroundModel, Calibrator, NoiseParams};
pub use events::{DebugSnapshot, EngineEvent, EventSink, Hint};
pub use presence::PresenceDetector;
pub use runtime::{CalibrationState, EngineRuntime, EngineStats};
pub use stability::{trigger_blocker, TriggerBlocker};
pub use text_gate::{
    is_deckish, normalize_text, NullTextScanner, RecognizedText, TextGate, TextScanner, TextReading,
    TextRecognizer, ThreadedTextScanner,
};

use crate::analysis::{
    coverage, is_obstructed, motion_score, FrameMetrics, PixelRect, RoiGeometry, RoiGrid,
    NO_REFERENCE_MOTION,
};
use crate::capture::{CaptureConfig, CaptureStep, Frame, SwapMode};
use runtime::elapsed;
use thiserror::Error;

/// Errors raised while analyzing a frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("frame has zero size ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
    #[error("frame {width}x{height} needs {needed} bytes, buffer has {actual}")]
    TruncatedFrame {
        width: u32,
        height: u32,
        needed: usize,
        actual: usize,
    },
}

/// Everything measured on one frame.
#[derive(Debug, Clone)]
pub struct FrameObservation {
    pub timestamp_ms: u64,
    /// Statistics of the frame inset by the full-frame margin.
    pub full: FrameMetrics,
    /// Statistics of the ROI.
    pub roi: FrameMetrics,
    pub grid: RoiGrid,
    pub motion_roi: f64,
    pub motion_full: f64,
}

/// Inputs to the presence/stability decision for one frame.
#[derive(Debug, Clone)]
pub struct PresenceSignals {
    pub now_ms: u64,
    pub bg_diff: f64,
    pub coverage: f64,
    pub motion_roi: f64,
    pub motion_full: f64,
    pub sharp: f64,
    /// Current ROI grid; needed for baseline tracking while awaiting a swap.
    pub grid: Option<RoiGrid>,
}

/// The capture decision engine.
#[derive(Debug)]
pub struct CaptureEngine<P: TextScanner = NullTextScanner> {
    config: CaptureConfig,
    runtime: EngineRuntime,
    background: Option<BackgroundModel>,
    calibrator: Calibrator,
    presence: PresenceDetector,
    text: TextGate<P>,
    stats: EngineStats,
}

impl CaptureEngine<NullTextScanner> {
    /// Creates an engine without a text scanner.
    pub fn new(config: CaptureConfig) -> Self {
        Self::with_text_scanner(config, NullTextScanner)
    }
}

impl<P: TextScanner> CaptureEngine<P> {
    /// Creates an engine that consults `scanner` for text presence.
    ///
    /// The engine starts calibrating the FRONT background.
    pub fn with_text_scanner(config: CaptureConfig, scanner: P) -> Self {
        let text = TextGate::new(scanner, config.text.clone());
        let calibrator = Calibrator::new(config.bg_calib_need_frames);
        let mut engine = Self {
            config,
            runtime: EngineRuntime::new(),
            background: None,
            calibrator,
            presence: PresenceDetector::new(),
            text,
            stats: EngineStats::default(),
        };
        engine.start_calibration(CaptureStep::Front);
        engine
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn runtime(&self) -> &EngineRuntime {
        &self.runtime
    }

    pub fn background(&self) -> Option<&BackgroundModel> {
        self.background.as_ref()
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn step(&self) -> CaptureStep {
        self.runtime.step
    }

    pub fn is_present(&self) -> bool {
        self.presence.is_present()
    }

    /// Analyzes one frame and emits the resulting events into `sink`.
    ///
    /// Never fails: a frame that cannot be analyzed is reported as
    /// [`EngineEvent::Error`] and skipped.
    pub fn analyze<S: EventSink + ?Sized>(&mut self, frame: &Frame, sink: &mut S) {
        if self.runtime.analyzing || self.runtime.capture_in_progress {
            self.stats.frames_dropped += 1;
            return;
        }

        let obs = match self.observe(frame) {
            Ok(obs) => obs,
            Err(e) => {
                self.stats.analysis_faults += 1;
                tracing::warn!(seq = frame.sequence(), error = %e, "Frame analysis failed");
                sink.emit(EngineEvent::Error(e.to_string()));
                return;
            }
        };
        self.stats.frames_analyzed += 1;
        let now = obs.timestamp_ms;

        if is_obstructed(&obs.full, &self.config.obstruction) {
            self.stats.frames_obstructed += 1;
            self.runtime.reset_counters();
            self.presence.reset();
            if elapsed(self.runtime.last_hint_ms, now, self.config.obstruction.hint_every_ms) {
                self.runtime.last_hint_ms = Some(now);
                sink.emit(EngineEvent::Hint(Hint::LensObstructed));
            }
            return;
        }

        if let Some(model) = &self.background {
            if !model.matches(&obs.grid) {
                tracing::warn!(
                    baseline = ?model.shape(),
                    grid = ?obs.grid.shape(),
                    "ROI grid shape changed; recalibrating background"
                );
                self.start_calibration(self.runtime.step);
            }
        } else if !self.runtime.is_calibrating() {
            self.start_calibration(self.runtime.step);
        }

        let signals = self.signals_for(&obs);
        self.maybe_debug(&obs, signals.as_ref(), sink);

        if self.runtime.is_calibrating() {
            self.calibrate(&obs, frame, sink);
            return;
        }

        if let Some(signals) = signals {
            if self.config.text_confirms_presence && !self.runtime.awaiting_swap {
                self.maybe_kick_text(frame, &signals);
            }
            self.decide(&signals, sink);
        }
    }

    /// Measures a frame and advances the motion references.
    pub fn observe(&mut self, frame: &Frame) -> Result<FrameObservation, AnalysisError> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(AnalysisError::EmptyFrame { width, height });
        }
        if !frame.is_valid() {
            return Err(AnalysisError::TruncatedFrame {
                width,
                height,
                needed: frame.required_len(),
                actual: frame.pixels().len(),
            });
        }

        let stride = self.config.sample_stride;
        let geometry = RoiGeometry::for_frame(
            &self.config.roi,
            width,
            height,
            frame.rotation_degrees(),
            stride,
        );
        let roi = FrameMetrics::over_region(frame, stride, geometry.rect);
        let grid = RoiGrid::from_samples(&roi.grid, &geometry, self.config.grid_size);
        let full = FrameMetrics::over_region(
            frame,
            stride,
            PixelRect::inset(width, height, self.config.full_frame_margin),
        );

        let motion_roi = reference_motion(self.runtime.last_grid.as_deref(), grid.cells());
        let motion_full = reference_motion(self.runtime.last_full.as_deref(), &full.grid);
        self.runtime.last_grid = Some(grid.cells().to_vec());
        self.runtime.last_full = Some(full.grid.clone());

        Ok(FrameObservation {
            timestamp_ms: frame.timestamp_ms(),
            full,
            roi,
            grid,
            motion_roi,
            motion_full,
        })
    }

    fn signals_for(&self, obs: &FrameObservation) -> Option<PresenceSignals> {
        let model = self.background.as_ref()?;
        Some(PresenceSignals {
            now_ms: obs.timestamp_ms,
            bg_diff: model.diff(&obs.grid),
            coverage: coverage(model.cells(), obs.grid.cells(), self.config.coverage_cell_thr),
            motion_roi: obs.motion_roi,
            motion_full: obs.motion_full,
            sharp: obs.roi.sharp,
            grid: Some(obs.grid.clone()),
        })
    }

    /// Presence, stability, focus and trigger logic for one frame.
    ///
    /// Does nothing until a background baseline is ready.
    pub fn decide<S: EventSink + ?Sized>(&mut self, s: &PresenceSignals, sink: &mut S) {
        if !self.runtime.background_ready() || self.background.is_none() {
            return;
        }
        if self.runtime.awaiting_swap {
            self.await_swap(s, sink);
            return;
        }

        let now = s.now_ms;
        let step = self.runtime.step;
        let coverage_ok =
            !self.config.coverage_guard_enabled || s.coverage >= self.config.min_coverage_enter;
        let mut present = self
            .presence
            .update(s.bg_diff, coverage_ok, self.config.presence_for(step));
        if present && self.config.text_confirms_presence {
            present = match step {
                CaptureStep::Front => self.text.text_present(now),
                CaptureStep::Back => self.text.deckish(now),
            };
        }

        if !present {
            self.runtime.reset_counters();
            return;
        }
        self.runtime.present_frames = self.runtime.present_frames.saturating_add(1);

        let motion_ok = self.motion_ok(s);
        if motion_ok
            && s.sharp < self.config.sharp_thr * self.config.focus_sharp_factor
            && elapsed(self.runtime.last_focus_ms, now, self.config.focus_cooldown_ms)
        {
            self.runtime.last_focus_ms = Some(now);
            self.stats.focus_requests += 1;
            tracing::debug!(sharp = s.sharp, "Requesting focus");
            sink.emit(EngineEvent::RequestFocus {
                point: self.config.roi.center(),
            });
        }

        if motion_ok && s.sharp > self.config.sharp_thr {
            self.runtime.stable_frames = self.runtime.stable_frames.saturating_add(1);
            self.runtime.stable_since_ms.get_or_insert(now);
        } else {
            self.runtime.break_stability();
        }

        match trigger_blocker(&self.runtime, &self.config, now) {
            None => self.trigger(now, sink),
            Some(blocker) => tracing::trace!(%blocker, "Capture blocked"),
        }
    }

    fn motion_ok(&self, s: &PresenceSignals) -> bool {
        s.motion_roi < self.config.motion_stable_thr && s.motion_full < self.config.motion_stable_thr_full
    }

    fn trigger<S: EventSink + ?Sized>(&mut self, now: u64, sink: &mut S) {
        let step = self.runtime.step;
        self.runtime.break_stability();
        self.runtime.last_capture_ms = Some(now);
        self.runtime.capture_in_progress = true;
        self.stats.triggers += 1;
        tracing::info!(step = %step, at_ms = now, "Capture triggered");
        sink.emit(EngineEvent::TriggerCapture { step });
    }

    fn await_swap<S: EventSink + ?Sized>(&mut self, s: &PresenceSignals, sink: &mut S) {
        let now = s.now_ms;
        let motion_ok = self.motion_ok(s);
        let within_coverage = s.coverage <= self.config.swap_max_coverage;
        let alpha = self.config.track_alpha;

        let Some(model) = self.background.as_mut() else {
            return;
        };
        let swap_threshold = model.swap_threshold();
        if motion_ok && within_coverage && s.bg_diff <= model.track_threshold() {
            if let Some(grid) = &s.grid {
                model.track(grid, alpha);
            }
        }

        if !(motion_ok && within_coverage && s.bg_diff <= swap_threshold) {
            self.runtime.absent_frames = 0;
            self.runtime.absent_since_ms = None;
            return;
        }

        self.runtime.absent_frames = self.runtime.absent_frames.saturating_add(1);
        let since = *self.runtime.absent_since_ms.get_or_insert(now);
        if self.runtime.absent_frames >= self.config.need_bg_match_frames
            && now.saturating_sub(since) >= self.config.need_bg_match_ms
        {
            let step = self.runtime.step;
            self.runtime.awaiting_swap = false;
            self.runtime.reset_counters();
            self.presence.reset();
            tracing::info!(step = %step, "Scene back at baseline; ready for next side");
            sink.emit(EngineEvent::Hint(Hint::PointAt { step }));
        }
    }

    fn calibrate<S: EventSink + ?Sized>(&mut self, obs: &FrameObservation, frame: &Frame, sink: &mut S) {
        let now = obs.timestamp_ms;
        if obs.motion_full >= NO_REFERENCE_MOTION {
            return;
        }

        if obs.motion_full < self.config.motion_stable_thr * self.config.text.motion_factor {
            self.text.maybe_kick(frame, now);
        }
        let card_visible = self.text.text_present(now);
        let still = obs.motion_full < self.config.bg_calib_motion_thr;

        if card_visible || !still {
            if elapsed(self.runtime.last_hint_ms, now, self.config.hint_every_ms) {
                self.runtime.last_hint_ms = Some(now);
                let hint = if card_visible {
                    Hint::RemoveCard
                } else {
                    Hint::HoldStill
                };
                sink.emit(EngineEvent::Hint(hint));
            }
            return;
        }

        self.calibrator.accumulate(&obs.grid);
        let params = NoiseParams::from_config(&self.config);
        if let Some(model) = self.calibrator.finalize(&params) {
            self.finish_calibration(model, sink);
        }
    }

    fn finish_calibration<S: EventSink + ?Sized>(&mut self, model: BackgroundModel, sink: &mut S) {
        let step = match self.runtime.calibration {
            CalibrationState::Calibrating { resume } => resume,
            _ => self.runtime.step,
        };
        let swap_threshold = model.swap_threshold();
        tracing::info!(
            step = %step,
            noise_mean = model.noise_mean(),
            noise_std = model.noise_std(),
            swap_threshold,
            track_threshold = model.track_threshold(),
            "Background calibrated"
        );

        self.background = Some(model);
        self.runtime.calibration = CalibrationState::Ready;
        self.runtime.step = step;
        self.runtime.awaiting_swap = false;
        self.runtime.reset_counters();
        self.presence.reset();
        self.stats.calibrations_completed += 1;

        sink.emit(EngineEvent::BackgroundCalibrated {
            step,
            swap_threshold,
        });
        sink.emit(EngineEvent::Hint(Hint::Calibrated { step }));
    }

    fn start_calibration(&mut self, resume: CaptureStep) {
        tracing::debug!(step = %resume, "Starting background calibration");
        self.background = None;
        self.calibrator.reset();
        self.runtime.calibration = CalibrationState::Calibrating { resume };
        self.runtime.step = resume;
        self.runtime.awaiting_swap = false;
        self.runtime.reset_counters();
        self.presence.reset();
    }

    fn maybe_kick_text(&mut self, frame: &Frame, s: &PresenceSignals) {
        let step = self.runtime.step;
        let likely_present = s.bg_diff > self.config.presence_for(step).absent;
        let sharp_factor = match step {
            CaptureStep::Front => self.config.text.sharp_factor_front,
            CaptureStep::Back => self.config.text.sharp_factor_back,
        };
        if likely_present
            && s.motion_roi < self.config.motion_stable_thr * self.config.text.motion_factor
            && s.sharp > self.config.sharp_thr * sharp_factor
        {
            self.text.maybe_kick(frame, s.now_ms);
        }
    }

    fn maybe_debug<S: EventSink + ?Sized>(
        &mut self,
        obs: &FrameObservation,
        signals: Option<&PresenceSignals>,
        sink: &mut S,
    ) {
        let now = obs.timestamp_ms;
        if !elapsed(self.runtime.last_debug_ms, now, self.config.debug_every_ms) {
            return;
        }
        self.runtime.last_debug_ms = Some(now);
        sink.emit(EngineEvent::Debug(DebugSnapshot {
            step: self.runtime.step,
            calibrating: self.runtime.is_calibrating(),
            calib_frames: self.calibrator.accepted(),
            awaiting_swap: self.runtime.awaiting_swap,
            present: self.presence.is_present(),
            present_frames: self.runtime.present_frames,
            stable_frames: self.runtime.stable_frames,
            bg_diff: signals.map(|s| s.bg_diff),
            coverage: signals.map(|s| s.coverage),
            swap_threshold: self.background.as_ref().map(|m| m.swap_threshold()),
            motion_roi: obs.motion_roi,
            motion_full: obs.motion_full,
            sharp: obs.roi.sharp,
            mean: obs.full.mean,
            std: obs.full.std,
            range: obs.full.range(),
            edge_frac: obs.full.edge_frac,
        }));
    }

    /// Discards the baseline and calibrates again, resuming as `resume`.
    ///
    /// Refused (returns `false`) while a still is being captured or
    /// labeled.
    pub fn request_recalibrate(&mut self, resume: CaptureStep) -> bool {
        if self.runtime.capture_in_progress || self.runtime.analyzing {
            tracing::debug!(step = %resume, "Recalibration refused while capture is busy");
            return false;
        }
        self.start_calibration(resume);
        self.runtime.forget_motion_reference();
        true
    }

    /// Moves on to `step` according to the configured swap mode.
    ///
    /// Refused while a capture is busy.
    pub fn advance_to(&mut self, step: CaptureStep) -> bool {
        match self.config.swap_mode {
            SwapMode::Recalibrate => self.request_recalibrate(step),
            SwapMode::AwaitSwap => {
                if self.runtime.capture_in_progress || self.runtime.analyzing {
                    return false;
                }
                if self.background.is_none() {
                    return self.request_recalibrate(step);
                }
                self.runtime.step = step;
                self.runtime.awaiting_swap = true;
                self.runtime.reset_counters();
                self.presence.reset();
                tracing::info!(step = %step, "Waiting for the card to be removed");
                true
            }
        }
    }

    /// Installs a baseline measured elsewhere and stops any calibration.
    pub fn install_background(&mut self, model: BackgroundModel) {
        self.background = Some(model);
        self.calibrator.reset();
        self.runtime.calibration = CalibrationState::Ready;
        self.runtime.reset_counters();
        self.presence.reset();
    }

    /// Marks a still capture or its validation as running.
    pub fn set_analyzing(&mut self, analyzing: bool) {
        self.runtime.analyzing = analyzing;
    }

    /// Keeps the trigger blocked while the user labels the accepted photo.
    pub fn lock_for_labeling(&mut self) {
        self.runtime.capture_in_progress = true;
        self.runtime.analyzing = false;
    }

    /// Clears the capture flags after a still was handled.
    pub fn mark_capture_finished(&mut self) {
        self.runtime.capture_in_progress = false;
        self.runtime.analyzing = false;
    }

    /// Re-arms after a rejected photo, keeping the background.
    pub fn rearm(&mut self) {
        self.mark_capture_finished();
        self.runtime.reset_counters();
        self.runtime.forget_motion_reference();
        self.presence.reset();
    }

    /// Recovers from a still capture that failed outright.
    pub fn on_capture_failed(&mut self) {
        self.mark_capture_finished();
        self.runtime.reset_counters();
        self.presence.reset();
        if self.config.recalibrate_on_capture_failure {
            self.start_calibration(self.runtime.step);
            self.runtime.forget_motion_reference();
        }
    }

    /// Starts a new card from the FRONT with a fresh background.
    pub fn reset_session(&mut self) {
        self.mark_capture_finished();
        self.runtime.last_capture_ms = None;
        self.runtime.last_focus_ms = None;
        self.runtime.forget_motion_reference();
        self.start_calibration(CaptureStep::Front);
    }
}

fn reference_motion(previous: Option<&[u8]>, current: &[u8]) -> f64 {
    match previous {
        Some(prev) if prev.len() == current.len() => motion_score(prev, current),
        _ => NO_REFERENCE_MOTION,
    }
}
