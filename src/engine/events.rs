//! Events emitted by the capture engine.

use crate::capture::CaptureStep;
use std::fmt;
use crossbeam::channel::Sender;

/// Everything the engine asks of, or reports to, the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Take a still for `step`. The caller must later clear the capture
    /// flags through the engine.
    TriggerCapture { step: CaptureStep },
    /// Run autofocus/auto-exposure at a normalized point.
    RequestFocus { point: (f32, f32) },
    /// A background baseline is ready; the engine now waits for `step`.
    BackgroundCalibrated { step: CaptureStep, swap_threshold: f64 },
    /// User guidance.
    Hint(Hint),
    /// Rate-limited diagnostic snapshot.
    Debug(DebugSnapshot),
    /// A frame could not be analyzed. The engine keeps running.
    Error(String),
}

/// User-facing guidance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hint {
    LensObstructed,
    RemoveCard,
    HoldStill,
    Calibrating { step: CaptureStep },
    Calibrated { step: CaptureStep },
    PointAt { step: CaptureStep },
    Blurry,
    BackOccluded,
    OutOfFrame,
    InvalidPhoto(String),
    CaptureFailed(String),
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hint::LensObstructed => f.write_str("Lens obstructed. Move your hand away from the camera."),
            Hint::RemoveCard => f.write_str("Remove the card while the background is calibrated."),
            Hint::HoldStill => f.write_str("Hold still while the background is calibrated."),
            Hint::Calibrating { step } => {
                write!(f, "Calibrating background for {step}... keep the area empty.")
            }
            Hint::Calibrated { step } => write!(f, "Background calibrated. Point at the {step}."),
            Hint::PointAt { step } => write!(f, "Now the {step}."),
            Hint::Blurry => f.write_str("Photo is blurry. Wait for it to settle and do not move the card."),
            Hint::BackOccluded => f.write_str("Something is covering the BACK. Hold the card by its edges."),
            Hint::OutOfFrame => f.write_str("Card is out of frame. Centre it and try again."),
            Hint::InvalidPhoto(reason) => write!(f, "Invalid photo ({reason}). Adjust and try again."),
            Hint::CaptureFailed(err) => write!(f, "Capture failed: {err}. Recalibrate and try again."),
        }
    }
}

/// Diagnostic values for an on-screen overlay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugSnapshot {
    pub step: CaptureStep,
    pub calibrating: bool,
    pub calib_frames: u32,
    pub awaiting_swap: bool,
    pub present: bool,
    pub present_frames: u32,
    pub stable_frames: u32,
    pub bg_diff: Option<f64>,
    pub coverage: Option<f64>,
    pub swap_threshold: Option<f64>,
    pub motion_roi: f64,
    pub motion_full: f64,
    pub sharp: f64,
    pub mean: f64,
    pub std: f64,
    pub range: u8,
    pub edge_frac: f64,
}

impl fmt::Display for DebugSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"));
        writeln!(
            f,
            "step={} calib={} ({}) awaitSwap={} present={} presentFrames={} stable={}",
            self.step,
            self.calibrating,
            self.calib_frames,
            self.awaiting_swap,
            self.present,
            self.present_frames,
            self.stable_frames
        )?;
        write!(
            f,
            "bgDiff={} cov={} swapThr={} mot={:.3}/{:.3} sharp={:.3} mean={:.3} std={:.3} range={} edge={:.3}",
            opt(self.bg_diff),
            opt(self.coverage),
            opt(self.swap_threshold),
            self.motion_roi,
            self.motion_full,
            self.sharp,
            self.mean,
            self.std,
            self.range,
            self.edge_frac
        )
    }
}

/// Receiver of engine events.
pub trait EventSink {
    fn emit(&mut self, event: EngineEvent);
}

impl EventSink for Vec<EngineEvent> {
    fn emit(&mut self, event: EngineEvent) {
        self.push(event);
    }
}

impl EventSink for Sender<EngineEvent> {
    fn emit(&mut self, event: EngineEvent) {
        if self.send(event).is_err() {
            tracing::trace!("Event receiver gone; dropping engine event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_records_in_order() {
        let mut log: Vec<EngineEvent> = Vec::new();
        log.emit(EngineEvent::Hint(Hint::HoldStill));
        log.emit(EngineEvent::TriggerCapture {
            step: CaptureStep::Back,
        });
        assert_eq!(log.len(), 2);
        assert_eq!(
            log[1],
            EngineEvent::TriggerCapture {
                step: CaptureStep::Back
            }
        );
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (mut tx, rx) = crossbeam::channel::unbounded::<EngineEvent>();
        tx.emit(EngineEvent::Hint(Hint::RemoveCard));
        assert_eq!(rx.try_recv(), Ok(EngineEvent::Hint(Hint::RemoveCard)));

        drop(rx);
        tx.emit(EngineEvent::Hint(Hint::HoldStill));
    }

    #[test]
    fn test_hint_text_names_step() {
        let text = Hint::Calibrated {
            step: CaptureStep::Back,
        }
        .to_string();
        assert!(text.contains("BACK"));
    }

    #[test]
    fn test_debug_snapshot_two_lines() {
        let text = DebugSnapshot::default().to_string();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("bgDiff=-"));
    }
}
