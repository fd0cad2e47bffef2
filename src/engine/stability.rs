//! Capture trigger gating.

use super::runtime::{elapsed, EngineRuntime};
use crate::capture::CaptureConfig;
use std::fmt;

/// First reason a capture may not fire yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerBlocker {
    CaptureInProgress,
    Analyzing,
    Calibrating,
    AwaitingSwap,
    NotPresentLongEnough,
    NotStableLongEnough,
    StableTooShort,
    FocusSettling,
    Cooldown,
}

impl fmt::Display for TriggerBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerBlocker::CaptureInProgress => "capture in progress",
            TriggerBlocker::Analyzing => "analyzing",
            TriggerBlocker::Calibrating => "calibrating",
            TriggerBlocker::AwaitingSwap => "awaiting swap",
            TriggerBlocker::NotPresentLongEnough => "not present long enough",
            TriggerBlocker::NotStableLongEnough => "not stable long enough",
            TriggerBlocker::StableTooShort => "stable window too short",
            TriggerBlocker::FocusSettling => "focus settling",
            TriggerBlocker::Cooldown => "capture cooldown",
        };
        f.write_str(s)
    }
}

/// Returns the first condition that blocks a capture at `now_ms`, or
/// `None` when every gate is open.
pub fn trigger_blocker(rt: &EngineRuntime, config: &CaptureConfig, now_ms: u64) -> Option<TriggerBlocker> {
    if rt.capture_in_progress {
        return Some(TriggerBlocker::CaptureInProgress);
    }
    if rt.analyzing {
        return Some(TriggerBlocker::Analyzing);
    }
    if rt.is_calibrating() {
        return Some(TriggerBlocker::Calibrating);
    }
    if rt.awaiting_swap {
        return Some(TriggerBlocker::AwaitingSwap);
    }
    if rt.present_frames < config.need_present_frames {
        return Some(TriggerBlocker::NotPresentLongEnough);
    }
    if rt.stable_frames < config.need_stable_frames {
        return Some(TriggerBlocker::NotStableLongEnough);
    }
    match rt.stable_since_ms {
        None => return Some(TriggerBlocker::NotStableLongEnough),
        Some(since) if now_ms.saturating_sub(since) < config.need_stable_ms => {
            return Some(TriggerBlocker::StableTooShort)
        }
        Some(_) => {}
    }
    if rt.last_focus_ms.is_some() && !elapsed(rt.last_focus_ms, now_ms, config.focus_settle_ms) {
        return Some(TriggerBlocker::FocusSettling);
    }
    if !elapsed(rt.last_capture_ms, now_ms, config.capture_cooldown_ms) {
        return Some(TriggerBlocker::Cooldown);
    }
    None
}
