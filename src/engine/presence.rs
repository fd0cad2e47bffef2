//! Hysteresis presence detection.

use crate::capture::PresenceThresholds;

/// Two-threshold presence state.
///
/// Entering "present" needs the background diff to reach the higher
/// threshold. Once present, the state holds while the diff stays above
/// the lower threshold, so a card that flickers around one value does
/// not toggle. The coverage guard must pass in both states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenceDetector {
    present: bool,
}

impl PresenceDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn reset(&mut self) {
        self.present = false;
    }

    /// Feeds one frame and returns the new state.
    pub fn update(&mut self, bg_diff: f64, coverage_ok: bool, thresholds: PresenceThresholds) -> bool {
        self.present = if self.present {
            bg_diff > thresholds.absent && coverage_ok
        } else {
            bg_diff >= thresholds.present && coverage_ok
        };
        self.present
    }
}
