//! Post-capture photo validation.
//!
//! A second, stricter gate run on the saved still rather than the live
//! analysis frames: blur rejection, card rectangle detection and, for the
//! back side, a name plate occlusion check. Rejections are values with a
//! reason code, not errors.

mod blur;
mod luma;
mod occlusion;
mod rect;

pub use blur::laplacian_variance;
pub use luma::LumaImage;
pub use occlusion::{edge_density, edge_threshold, name_plate_region};
pub use rect::{detect_card_rect, top_k_peaks, CardRect};

use crate::capture::{CaptureStep, RoiNorm};
use crate::engine::Hint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Failures that stop validation before any check runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("luma buffer of {len} bytes does not match {width}x{height}")]
    BufferSize {
        width: usize,
        height: usize,
        len: usize,
    },
}

/// Validator thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Longest edge after downsampled decode.
    pub max_dim: u32,
    /// Images with either side below this are rejected.
    pub min_side: usize,
    pub blur_thr_front: f64,
    pub blur_thr_back: f64,

    pub rect_aspect_min: f64,
    pub rect_aspect_max: f64,
    /// Projection peaks tried per axis.
    pub peaks_k: usize,
    pub peak_min_sep: usize,
    pub smooth_window: usize,
    pub min_rect_w: usize,
    pub min_rect_h: usize,
    pub rect_area_weight: f64,
    pub rect_edge_floor: u32,
    pub rect_edge_factor: f64,

    /// Name plate region, relative to the detected card.
    pub back_roi: RoiNorm,
    pub back_edge_min: u32,
    pub back_edge_max: u32,
    pub back_edge_factor: f64,
    pub back_min_edge_density: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_dim: 720,
            min_side: 64,
            blur_thr_front: 110.0,
            blur_thr_back: 90.0,

            rect_aspect_min: 0.55,
            rect_aspect_max: 0.92,
            peaks_k: 22,
            peak_min_sep: 10,
            smooth_window: 17,
            min_rect_w: 90,
            min_rect_h: 120,
            rect_area_weight: 0.0006,
            rect_edge_floor: 6,
            rect_edge_factor: 0.55,

            back_roi: RoiNorm {
                left: 0.25,
                top: 0.62,
                right: 0.75,
                bottom: 0.88,
            },
            back_edge_min: 10,
            back_edge_max: 220,
            back_edge_factor: 0.55,
            back_min_edge_density: 0.012,
        }
    }
}

impl ValidatorConfig {
    pub fn blur_threshold(&self, step: CaptureStep) -> f64 {
        match step {
            CaptureStep::Front => self.blur_thr_front,
            CaptureStep::Back => self.blur_thr_back,
        }
    }
}

/// Why a photo was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Ok,
    DecodeFail,
    TooSmall,
    Blur,
    RectNotFound,
    OcclusionBack,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Ok => "OK",
            ReasonCode::DecodeFail => "DECODE_FAIL",
            ReasonCode::TooSmall => "TOO_SMALL",
            ReasonCode::Blur => "BLUR",
            ReasonCode::RectNotFound => "RECT_NOT_FOUND",
            ReasonCode::OcclusionBack => "OCCLUSION_BACK",
        }
    }

    /// Guidance for the user after a rejection.
    pub fn hint(&self) -> Option<Hint> {
        match self {
            ReasonCode::Ok => None,
            ReasonCode::Blur => Some(Hint::Blurry),
            ReasonCode::OcclusionBack => Some(Hint::BackOccluded),
            ReasonCode::RectNotFound => Some(Hint::OutOfFrame),
            ReasonCode::DecodeFail | ReasonCode::TooSmall => {
                Some(Hint::InvalidPhoto(self.as_str().to_string()))
            }
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating one photo.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub accepted: bool,
    pub reason: ReasonCode,
    /// Free-form diagnostics for logs.
    pub debug: String,
    pub blur_variance: Option<f64>,
    pub rect: Option<CardRect>,
}

impl ValidationResult {
    fn reject(reason: ReasonCode, debug: String) -> Self {
        Self {
            accepted: false,
            reason,
            debug,
            blur_variance: None,
            rect: None,
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if !self.debug.is_empty() {
            write!(f, " {}", self.debug)?;
        }
        Ok(())
    }
}

/// Blur, rectangle and occlusion gate for saved stills.
#[derive(Debug, Clone, Default)]
pub struct PhotoValidator {
    config: ValidatorConfig,
}

impl PhotoValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Decodes and validates an image file. The file is left untouched.
    pub fn validate_file(&self, path: &Path, step: CaptureStep) -> ValidationResult {
        let result = match LumaImage::decode_downsampled(path, self.config.max_dim) {
            Ok(img) => self.validate_luma(&img, step),
            Err(e) => ValidationResult::reject(ReasonCode::DecodeFail, e.to_string()),
        };
        if result.accepted {
            tracing::debug!(path = %path.display(), step = %step, "{result}");
        } else {
            tracing::warn!(path = %path.display(), step = %step, reason = %result.reason, "Photo rejected: {}", result.debug);
        }
        result
    }

    /// Validates an already decoded luma image.
    pub fn validate_luma(&self, img: &LumaImage, step: CaptureStep) -> ValidationResult {
        let cfg = &self.config;
        let (w, h) = (img.width(), img.height());
        if w < cfg.min_side || h < cfg.min_side {
            return ValidationResult::reject(ReasonCode::TooSmall, format!("w={w} h={h}"));
        }

        let var_lap = laplacian_variance(img);
        let blur_thr = cfg.blur_threshold(step);
        if var_lap < blur_thr {
            return ValidationResult {
                blur_variance: Some(var_lap),
                ..ValidationResult::reject(
                    ReasonCode::Blur,
                    format!("varLap={var_lap:.1} thr={blur_thr} step={step}"),
                )
            };
        }

        let Some(rect) = detect_card_rect(img, cfg) else {
            return ValidationResult {
                blur_variance: Some(var_lap),
                ..ValidationResult::reject(
                    ReasonCode::RectNotFound,
                    format!("step={step} varLap={var_lap:.1}"),
                )
            };
        };

        if step == CaptureStep::Back {
            let thr = edge_threshold(img, cfg);
            let plate = name_plate_region(&rect, &cfg.back_roi);
            let density = edge_density(img, thr, &plate);
            if density < cfg.back_min_edge_density {
                return ValidationResult {
                    blur_variance: Some(var_lap),
                    rect: Some(rect),
                    ..ValidationResult::reject(
                        ReasonCode::OcclusionBack,
                        format!(
                            "roiEdgeDens={density:.3} min={} thrEdge={thr} roi={},{}..{},{}",
                            cfg.back_min_edge_density, plate.x0, plate.y0, plate.x1, plate.y1
                        ),
                    )
                };
            }
        }

        ValidationResult {
            accepted: true,
            reason: ReasonCode::Ok,
            debug: format!(
                "step={step} varLap={var_lap:.1} rect={},{}..{},{} asp={:.2}",
                rect.x0,
                rect.y0,
                rect.x1,
                rect.y1,
                rect.aspect()
            ),
            blur_variance: Some(var_lap),
            rect: Some(rect),
        }
    }
}
