//! Lens obstruction guard.
//!
//! A hand over the lens shows up as a dark frame with almost no edges and
//! a narrow luma range, regardless of what the background model says.

use super::FrameMetrics;
use crate::capture::ObstructionConfig;

/// Returns true when full-frame statistics look like a covered lens.
pub fn is_obstructed(metrics: &FrameMetrics, config: &ObstructionConfig) -> bool {
    config.enabled
        && metrics.edge_frac <= config.max_edge_frac
        && metrics.range() <= config.max_range
        && metrics.mean <= config.max_mean
}
