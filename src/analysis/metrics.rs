//! Per-frame luma statistics.
//!
//! Samples a rectangular region of the frame every `stride` pixels and
//! summarizes the samples. Edge and sharpness measures are computed on
//! the sampled grid, not the raw frame, so they stay cheap at any
//! sensor resolution.

use super::roi::PixelRect;
use crate::capture::Frame;

/// Samples darker than this count towards `dark_frac`.
pub const DARK_THRESHOLD: u8 = 80;

/// Grid gradient magnitude above this counts as an edge.
pub const EDGE_THRESHOLD: u32 = 70;

/// Margin of the default full-frame statistics region.
pub const WIDE_MARGIN: f32 = 0.12;

/// Statistics of one analyzed frame region.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetrics {
    /// Sampled luma values, row-major.
    pub grid: Vec<u8>,
    pub grid_width: usize,
    pub grid_height: usize,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Fraction of samples below [`DARK_THRESHOLD`].
    pub dark_frac: f64,
    /// Fraction of interior grid cells whose gradient exceeds [`EDGE_THRESHOLD`].
    pub edge_frac: f64,
    /// Mean gradient magnitude over interior grid cells.
    pub sharp: f64,
    pub min_val: u8,
    pub max_val: u8,
}

impl FrameMetrics {
    /// Metrics over the frame inset by [`WIDE_MARGIN`] on every side.
    pub fn wide(frame: &Frame, stride: u32) -> Self {
        let region = PixelRect::inset(frame.width(), frame.height(), WIDE_MARGIN);
        Self::over_region(frame, stride, region)
    }

    /// Metrics over `region`, sampled every `stride` pixels in both axes.
    pub fn over_region(frame: &Frame, stride: u32, region: PixelRect) -> Self {
        let step = stride.max(1) as usize;
        let region = region.clamp_to(frame.width(), frame.height());
        let (out_w, out_h) = region.sampled_dims(stride);

        let mut grid = Vec::with_capacity(out_w * out_h);
        let mut sum = 0.0f64;
        let mut sum2 = 0.0f64;
        let mut dark = 0usize;
        let mut min_val = u8::MAX;
        let mut max_val = u8::MIN;

        for y in (region.y0..region.y1).step_by(step) {
            for x in (region.x0..region.x1).step_by(step) {
                let v = frame.luma(x, y);
                grid.push(v);

                let vf = f64::from(v);
                sum += vf;
                sum2 += vf * vf;
                if v < DARK_THRESHOLD {
                    dark += 1;
                }
                min_val = min_val.min(v);
                max_val = max_val.max(v);
            }
        }

        let n = grid.len().max(1) as f64;
        let mean = sum / n;
        let std = ((sum2 / n) - mean * mean).max(0.0).sqrt();
        if grid.is_empty() {
            min_val = 0;
            max_val = 0;
        }

        let (edge_frac, sharp) = grid_gradients(&grid, out_w, out_h);

        Self {
            grid,
            grid_width: out_w,
            grid_height: out_h,
            mean,
            std,
            dark_frac: dark as f64 / n,
            edge_frac,
            sharp,
            min_val,
            max_val,
        }
    }

    /// Luma range (max - min) of the samples.
    #[inline]
    pub fn range(&self) -> u8 {
        self.max_val - self.min_val
    }
}

/// Edge fraction and mean gradient over the interior of a sampled grid.
///
/// Grids narrower than 3×3 have no interior and report zero for both.
fn grid_gradients(grid: &[u8], w: usize, h: usize) -> (f64, f64) {
    if w < 3 || h < 3 || grid.len() < w * h {
        return (0.0, 0.0);
    }

    let px = |x: usize, y: usize| i32::from(grid[y * w + x]);
    let mut edges = 0usize;
    let mut grad_sum = 0.0f64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let dx = (px(x + 1, y) - px(x - 1, y)).unsigned_abs();
            let dy = (px(x, y + 1) - px(x, y - 1)).unsigned_abs();
            let g = dx + dy;
            grad_sum += f64::from(g);
            if g > EDGE_THRESHOLD {
                edges += 1;
            }
        }
    }

    let interior = ((w - 2) * (h - 2)).max(1) as f64;
    (edges as f64 / interior, grad_sum / interior)
}
