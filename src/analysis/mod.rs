//! Frame analysis primitives.
//!
//! Pure functions that turn one frame into statistical summaries: sampled
//! luma statistics, a fixed-size ROI grid, grid-to-grid motion and the
//! lens obstruction check. Nothing here keeps state between frames.

mod metrics;
mod motion;
mod obstruction;
mod roi;

pub use metrics::{FrameMetrics, DARK_THRESHOLD, EDGE_THRESHOLD, WIDE_MARGIN};
pub use motion::{coverage, motion_score, NO_REFERENCE_MOTION};
pub use obstruction::is_obstructed;
pub use roi::{
    infer_raw_dims, reduce_to_grid, sensor_rect, PixelRect, RoiGeometry, RoiGrid,
};
