//! Capture engine configuration.
//!
//! Every threshold here is a tuning value measured against one camera
//! and lighting setup. Defaults match the handheld rig the pipeline was
//! built on; re-tune them for other cameras instead of trusting them.

use super::CaptureStep;
use crate::upload::UploadConfig;
use crate::validation::ValidatorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Normalized region of the frame where the card is expected to sit.
///
/// Coordinates are fractions of the upright (display-oriented) frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoiNorm {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Default for RoiNorm {
    fn default() -> Self {
        Self {
            left: 0.12,
            top: 0.18,
            right: 0.88,
            bottom: 0.82,
        }
    }
}

impl RoiNorm {
    /// The whole frame.
    pub fn full() -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            right: 1.0,
            bottom: 1.0,
        }
    }

    /// Inset region with the same margin on every side.
    pub fn inset(margin: f32) -> Self {
        Self {
            left: margin,
            top: margin,
            right: 1.0 - margin,
            bottom: 1.0 - margin,
        }
        .clamped()
    }

    /// Clamps to `[0, 1]` and orders the edges.
    pub fn clamped(self) -> Self {
        let l = self.left.clamp(0.0, 1.0);
        let r = self.right.clamp(0.0, 1.0);
        let t = self.top.clamp(0.0, 1.0);
        let b = self.bottom.clamp(0.0, 1.0);
        Self {
            left: l.min(r),
            top: t.min(b),
            right: l.max(r),
            bottom: t.max(b),
        }
    }

    /// Centre point, used as the focus/metering target.
    pub fn center(&self) -> (f32, f32) {
        (
            self.left + (self.right - self.left) * 0.5,
            self.top + (self.bottom - self.top) * 0.5,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }
}

/// Hysteresis pair for one capture step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresenceThresholds {
    /// Background diff needed to enter "present".
    pub present: f64,
    /// Background diff that must be exceeded to stay "present".
    pub absent: f64,
}

/// Full-frame statistics that mark the lens as covered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObstructionConfig {
    pub enabled: bool,
    /// Maximum edge fraction of an obstructed frame.
    pub max_edge_frac: f64,
    /// Maximum luma range (max - min) of an obstructed frame.
    pub max_range: u8,
    /// Maximum mean luma; a covered lens is also dark.
    pub max_mean: f64,
    /// Minimum spacing between "lens obstructed" hints.
    pub hint_every_ms: u64,
}

impl Default for ObstructionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_edge_frac: 0.002,
            max_range: 18,
            max_mean: 70.0,
            hint_every_ms: 900,
        }
    }
}

/// Rate limits and thresholds for the text-presence scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextGateConfig {
    /// Minimum spacing between scanner kicks.
    pub period_ms: u64,
    /// Results older than this are ignored.
    pub stale_ms: u64,
    /// Normalized character count that counts as "text present".
    pub min_chars: usize,
    /// Line count that counts as "text present".
    pub min_lines: usize,
    /// Kick only while motion is below `motion_stable_thr * motion_factor`.
    pub motion_factor: f64,
    /// Kick only while sharpness exceeds `sharp_thr * factor` (FRONT).
    pub sharp_factor_front: f64,
    /// Same as above for BACK.
    pub sharp_factor_back: f64,
}

impl Default for TextGateConfig {
    fn default() -> Self {
        Self {
            period_ms: 320,
            stale_ms: 1200,
            min_chars: 28,
            min_lines: 2,
            motion_factor: 2.0,
            sharp_factor_front: 0.55,
            sharp_factor_back: 0.35,
        }
    }
}

/// How the engine moves from FRONT to BACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SwapMode {
    /// Rebuild the background before the next side.
    #[default]
    Recalibrate,
    /// Wait for the scene to return to the calibrated background.
    AwaitSwap,
}

/// Configuration for the capture decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Sample every N-th pixel in both axes.
    pub sample_stride: u32,
    /// Margin of the full-frame statistics region.
    pub full_frame_margin: f32,
    pub roi: RoiNorm,
    /// Side of the N×N block-averaged ROI grid.
    pub grid_size: usize,

    /// ROI grid motion below this counts as still.
    pub motion_stable_thr: f64,
    /// Full-frame motion below this counts as still.
    pub motion_stable_thr_full: f64,
    /// Minimum ROI sharpness for capture.
    pub sharp_thr: f64,
    /// Below `sharp_thr * focus_sharp_factor` a focus request is issued.
    pub focus_sharp_factor: f64,

    pub presence_front: PresenceThresholds,
    pub presence_back: PresenceThresholds,
    pub coverage_guard_enabled: bool,
    /// Per-cell difference that counts a cell as covered.
    pub coverage_cell_thr: u8,
    /// Fraction of covered cells needed for presence.
    pub min_coverage_enter: f64,
    /// Require the text scanner to confirm presence.
    pub text_confirms_presence: bool,

    pub need_present_frames: u32,
    pub need_stable_frames: u32,
    pub need_stable_ms: u64,

    pub focus_cooldown_ms: u64,
    pub focus_settle_ms: u64,
    pub capture_cooldown_ms: u64,
    pub debug_every_ms: u64,
    pub hint_every_ms: u64,

    /// Frames accumulated into the background baseline.
    pub bg_calib_need_frames: u32,
    /// Full-frame motion ceiling for a calibration frame.
    pub bg_calib_motion_thr: f64,
    pub noise_k: f64,
    pub noise_margin: f64,
    pub track_multiplier: f64,
    pub track_alpha: f64,

    pub swap_mode: SwapMode,
    pub need_bg_match_frames: u32,
    pub need_bg_match_ms: u64,
    /// Coverage ceiling while waiting for the card to be removed.
    pub swap_max_coverage: f64,
    /// Rebuild the background after a failed still capture.
    pub recalibrate_on_capture_failure: bool,

    pub obstruction: ObstructionConfig,
    pub text: TextGateConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_stride: 12,
            full_frame_margin: 0.12,
            roi: RoiNorm::default(),
            grid_size: 16,

            motion_stable_thr: 6.5,
            motion_stable_thr_full: 5.8,
            sharp_thr: 11.0,
            focus_sharp_factor: 0.9,

            presence_front: PresenceThresholds {
                present: 20.0,
                absent: 17.0,
            },
            presence_back: PresenceThresholds {
                present: 16.0,
                absent: 13.0,
            },
            coverage_guard_enabled: true,
            coverage_cell_thr: 18,
            min_coverage_enter: 0.25,
            text_confirms_presence: false,

            need_present_frames: 7,
            need_stable_frames: 7,
            need_stable_ms: 2000,

            focus_cooldown_ms: 2000,
            focus_settle_ms: 600,
            capture_cooldown_ms: 700,
            debug_every_ms: 120,
            hint_every_ms: 450,

            bg_calib_need_frames: 20,
            bg_calib_motion_thr: 4.0,
            noise_k: 4.5,
            noise_margin: 0.8,
            track_multiplier: 1.35,
            track_alpha: 0.06,

            swap_mode: SwapMode::Recalibrate,
            need_bg_match_frames: 6,
            need_bg_match_ms: 500,
            swap_max_coverage: 0.10,
            recalibrate_on_capture_failure: true,

            obstruction: ObstructionConfig::default(),
            text: TextGateConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// Presence thresholds for a capture step.
    pub fn presence_for(&self, step: CaptureStep) -> PresenceThresholds {
        match step {
            CaptureStep::Front => self.presence_front,
            CaptureStep::Back => self.presence_back,
        }
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_stride == 0 || self.grid_size == 0 {
            return Err(ConfigError::InvalidSampling);
        }
        if self.roi.clamped().is_empty() {
            return Err(ConfigError::EmptyRoi);
        }
        for (step, t) in [
            (CaptureStep::Front, self.presence_front),
            (CaptureStep::Back, self.presence_back),
        ] {
            if t.present <= t.absent {
                return Err(ConfigError::InvalidHysteresis {
                    step,
                    present: t.present,
                    absent: t.absent,
                });
            }
        }
        if self.bg_calib_need_frames == 0 {
            return Err(ConfigError::InvalidCalibration);
        }
        if !(0.0..=1.0).contains(&self.track_alpha) {
            return Err(ConfigError::InvalidTrackAlpha(self.track_alpha));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("sample stride and grid size must be non-zero")]
    InvalidSampling,
    #[error("region of interest is empty")]
    EmptyRoi,
    #[error("{step} presence threshold {present} must exceed absence threshold {absent}")]
    InvalidHysteresis {
        step: CaptureStep,
        present: f64,
        absent: f64,
    },
    #[error("background calibration needs at least one frame")]
    InvalidCalibration,
    #[error("tracking alpha {0} outside [0, 1]")]
    InvalidTrackAlpha(f64),
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub validation: ValidatorConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.capture.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_hysteresis_invalid() {
        let mut config = CaptureConfig::default();
        config.presence_back.absent = 30.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHysteresis {
                step: CaptureStep::Back,
                ..
            })
        ));
    }

    #[test]
    fn test_zero_stride_invalid() {
        let mut config = CaptureConfig::default();
        config.sample_stride = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSampling)
        ));
    }

    #[test]
    fn test_roi_clamped_and_ordered() {
        let roi = RoiNorm {
            left: 0.9,
            top: -0.2,
            right: 0.1,
            bottom: 1.4,
        }
        .clamped();
        assert_eq!(roi.left, 0.1);
        assert_eq!(roi.right, 0.9);
        assert_eq!(roi.top, 0.0);
        assert_eq!(roi.bottom, 1.0);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = FileConfig::from_toml(
            r#"
            [capture]
            grid_size = 12
            swap_mode = "await_swap"

            [capture.presence_front]
            present = 22.0
            absent = 18.0
            "#,
        )
        .unwrap();

        assert_eq!(config.capture.grid_size, 12);
        assert_eq!(config.capture.swap_mode, SwapMode::AwaitSwap);
        assert_eq!(config.capture.presence_front.present, 22.0);
        assert_eq!(config.capture.sample_stride, 12);
        assert_eq!(config.upload.max_retries, 5);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = FileConfig::from_toml("[capture]\ngrid_size = \"big\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
