//! Mutable session state of the capture engine.

use crate::capture::CaptureStep;

/// Background calibration phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationState {
    #[default]
    NotCalibrating,
    /// Accumulating empty-scene frames; resumes as `resume` when done.
    Calibrating { resume: CaptureStep },
    Ready,
}

/// Counters, timestamps and flags for one capture session.
///
/// Owned by the analysis worker. Other workers change it only through
/// the engine's methods, called from the analysis worker's loop.
#[derive(Debug, Clone, Default)]
pub struct EngineRuntime {
    pub step: CaptureStep,
    pub calibration: CalibrationState,

    /// Consecutive frames judged present.
    pub present_frames: u32,
    /// Consecutive present frames with low motion and adequate sharpness.
    pub stable_frames: u32,
    /// Consecutive frames back at the baseline while awaiting a swap.
    pub absent_frames: u32,

    pub stable_since_ms: Option<u64>,
    pub absent_since_ms: Option<u64>,
    pub last_capture_ms: Option<u64>,
    pub last_focus_ms: Option<u64>,
    pub last_debug_ms: Option<u64>,
    pub last_hint_ms: Option<u64>,

    /// A still is being captured or validated.
    pub analyzing: bool,
    /// A trigger fired and has not been cleared yet.
    pub capture_in_progress: bool,
    pub awaiting_swap: bool,

    /// Previous ROI grid, for motion scoring.
    pub last_grid: Option<Vec<u8>>,
    /// Previous full-frame sample grid, for motion scoring.
    pub last_full: Option<Vec<u8>>,
}

impl EngineRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_calibrating(&self) -> bool {
        matches!(self.calibration, CalibrationState::Calibrating { .. })
    }

    pub fn background_ready(&self) -> bool {
        self.calibration == CalibrationState::Ready
    }

    /// Clears presence, stability and absence counters.
    pub fn reset_counters(&mut self) {
        self.present_frames = 0;
        self.stable_frames = 0;
        self.absent_frames = 0;
        self.stable_since_ms = None;
        self.absent_since_ms = None;
    }

    /// Breaks the current stability streak.
    pub fn break_stability(&mut self) {
        self.stable_frames = 0;
        self.stable_since_ms = None;
    }

    /// Drops the motion references so the next frame starts fresh.
    pub fn forget_motion_reference(&mut self) {
        self.last_grid = None;
        self.last_full = None;
    }
}

/// Returns true when `period_ms` has passed since `last`.
pub(crate) fn elapsed(last: Option<u64>, now_ms: u64, period_ms: u64) -> bool {
    last.map_or(true, |t| now_ms.saturating_sub(t) >= period_ms)
}

/// Running totals for metrics export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub frames_analyzed: u64,
    pub frames_dropped: u64,
    pub frames_obstructed: u64,
    pub analysis_faults: u64,
    pub calibrations_completed: u64,
    pub triggers: u64,
    pub focus_requests: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_counters_keeps_flags() {
        let mut rt = EngineRuntime::new();
        rt.present_frames = 5;
        rt.stable_frames = 3;
        rt.stable_since_ms = Some(10);
        rt.capture_in_progress = true;

        rt.reset_counters();

        assert_eq!(rt.present_frames, 0);
        assert_eq!(rt.stable_frames, 0);
        assert!(rt.stable_since_ms.is_none());
        assert!(rt.capture_in_progress);
    }

    #[test]
    fn test_elapsed() {
        assert!(elapsed(None, 0, 500));
        assert!(!elapsed(Some(100), 400, 500));
        assert!(elapsed(Some(100), 600, 500));
        // Clock going backwards never counts as elapsed
        assert!(!elapsed(Some(700), 600, 1));
    }
}
