//! Back-side name plate occlusion check.
//!
//! The card back has a printed name plate in its lower half. A finger
//! over it hides its edges while leaving the card outline intact, so the
//! check measures edge density inside that region only.

use super::rect::CardRect;
use super::{LumaImage, ValidatorConfig};
use crate::capture::RoiNorm;

/// Adaptive edge threshold from the image's 90th-percentile gradient.
pub fn edge_threshold(img: &LumaImage, config: &ValidatorConfig) -> u32 {
    let p90 = img.gradient_percentile(0.9).unwrap_or(config.back_edge_min);
    let thr = config
        .back_edge_min
        .max((f64::from(p90) * config.back_edge_factor) as u32);
    thr.clamp(config.back_edge_min, config.back_edge_max)
}

/// Region of `card` covered by the normalized `plate` rectangle.
pub fn name_plate_region(card: &CardRect, plate: &RoiNorm) -> CardRect {
    let part = |len: usize, frac: f32| (len as f64 * f64::from(frac)).round() as usize;
    let x0 = card.x0 + part(card.width(), plate.left);
    let x1 = card.x0 + part(card.width(), plate.right);
    let y0 = card.y0 + part(card.height(), plate.top);
    let y1 = card.y0 + part(card.height(), plate.bottom);
    CardRect {
        x0,
        y0,
        x1: x1.max(x0 + 1),
        y1: y1.max(y0 + 1),
    }
}

/// Fraction of pixels in `region` whose gradient magnitude reaches `thr`.
///
/// The region is clamped to the image interior.
pub fn edge_density(img: &LumaImage, thr: u32, region: &CardRect) -> f64 {
    let (w, h) = (img.width(), img.height());
    if w < 3 || h < 3 {
        return 0.0;
    }
    let cx = |x: usize| x.clamp(1, w - 2);
    let cy = |y: usize| y.clamp(1, h - 2);

    let mut edges = 0usize;
    let mut total = 0usize;
    for y in cy(region.y0)..=cy(region.y1) {
        for x in cx(region.x0)..=cx(region.x1) {
            let (dx, dy) = img.gradient(x, y);
            if dx.unsigned_abs() + dy.unsigned_abs() >= thr {
                edges += 1;
            }
            total += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        edges as f64 / total as f64
    }
}
