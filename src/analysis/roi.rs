//! Region of interest mapping and fixed-size grid reduction.
//!
//! The ROI is configured in upright display coordinates while frames
//! arrive in sensor orientation. The sampled ROI is reduced to an N×N
//! block-averaged grid so frames can be diffed against each other no
//! matter the sensor resolution.

use crate::capture::RoiNorm;

/// Pixel rectangle in sensor coordinates, end-exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: width,
            y1: height,
        }
    }

    /// Frame inset by `margin` (fraction) on every side.
    pub fn inset(width: u32, height: u32, margin: f32) -> Self {
        let m = f64::from(margin);
        let (w, h) = (f64::from(width), f64::from(height));
        Self {
            x0: (w * m) as u32,
            y0: (h * m) as u32,
            x1: (w * (1.0 - m)) as u32,
            y1: (h * (1.0 - m)) as u32,
        }
    }

    /// Keeps the rectangle inside the frame with at least one pixel.
    pub fn clamp_to(self, width: u32, height: u32) -> Self {
        let x0 = self.x0.min(width.saturating_sub(1));
        let y0 = self.y0.min(height.saturating_sub(1));
        Self {
            x0,
            y0,
            x1: self.x1.min(width).max(x0 + 1),
            y1: self.y1.min(height).max(y0 + 1),
        }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    /// Number of samples along each axis when sampling every `stride` pixels.
    pub fn sampled_dims(&self, stride: u32) -> (usize, usize) {
        let s = stride.max(1);
        (
            self.width().max(1).div_ceil(s) as usize,
            self.height().max(1).div_ceil(s) as usize,
        )
    }
}

/// Maps an upright ROI onto sensor pixels for a buffer rotated by `rotation`.
///
/// `rotation` is the clockwise angle that turns the sensor buffer upright.
pub fn sensor_rect(roi: &RoiNorm, width: u32, height: u32, rotation: u32) -> PixelRect {
    let r = roi.clamped();
    let (nx0, nx1, ny0, ny1) = match rotation % 360 {
        90 => (r.top, r.bottom, 1.0 - r.right, 1.0 - r.left),
        180 => (1.0 - r.right, 1.0 - r.left, 1.0 - r.bottom, 1.0 - r.top),
        270 => (1.0 - r.bottom, 1.0 - r.top, r.left, r.right),
        _ => (r.left, r.right, r.top, r.bottom),
    };
    PixelRect {
        x0: (nx0 * width as f32) as u32,
        y0: (ny0 * height as f32) as u32,
        x1: (nx1 * width as f32) as u32,
        y1: (ny1 * height as f32) as u32,
    }
    .clamp_to(width, height)
}

/// Geometry of the raw ROI sample buffer for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiGeometry {
    pub rect: PixelRect,
    /// Samples per row and rows, as expected from the frame metadata.
    pub expected_dims: (usize, usize),
}

impl RoiGeometry {
    pub fn for_frame(roi: &RoiNorm, width: u32, height: u32, rotation: u32, stride: u32) -> Self {
        let rect = sensor_rect(roi, width, height, rotation);
        Self {
            rect,
            expected_dims: rect.sampled_dims(stride),
        }
    }
}

/// Width and height of a raw sample buffer of `len` bytes.
///
/// Uses `expected` when it accounts for every byte. Otherwise picks the
/// integer factorization of `len` whose aspect ratio is closest to the
/// expected one.
pub fn infer_raw_dims(len: usize, expected: (usize, usize)) -> (usize, usize) {
    if len == 0 {
        return (0, 0);
    }
    if expected.0 * expected.1 == len {
        return expected;
    }

    let target = (expected.0.max(1) as f64 / expected.1.max(1) as f64).ln();
    let mut best = (len, 1);
    let mut best_err = f64::INFINITY;
    let mut f = 1usize;
    while f * f <= len {
        if len % f == 0 {
            for (w, h) in [(f, len / f), (len / f, f)] {
                let err = ((w as f64 / h as f64).ln() - target).abs();
                if err < best_err {
                    best_err = err;
                    best = (w, h);
                }
            }
        }
        f += 1;
    }
    tracing::debug!(
        len,
        expected_w = expected.0,
        expected_h = expected.1,
        inferred_w = best.0,
        inferred_h = best.1,
        "ROI sample buffer did not match expected geometry"
    );
    best
}

/// Block-averages a `w`×`h` sample grid down to `n`×`n` cells.
///
/// When the source is smaller than `n` along an axis, source samples are
/// repeated so every cell still has at least one contributor.
pub fn reduce_to_grid(samples: &[u8], w: usize, h: usize, n: usize) -> Vec<u8> {
    if n == 0 || w == 0 || h == 0 || samples.len() < w * h {
        return Vec::new();
    }

    let span = |i: usize, len: usize| {
        let start = (i * len / n).min(len - 1);
        let end = ((i + 1) * len / n).clamp(start + 1, len);
        start..end
    };

    let mut out = Vec::with_capacity(n * n);
    for gy in 0..n {
        let rows = span(gy, h);
        for gx in 0..n {
            let cols = span(gx, w);
            let mut sum = 0u32;
            let mut count = 0u32;
            for y in rows.clone() {
                let row = &samples[y * w..(y + 1) * w];
                for &v in &row[cols.clone()] {
                    sum += u32::from(v);
                    count += 1;
                }
            }
            out.push((sum / count.max(1)) as u8);
        }
    }
    out
}

/// Fixed-size ROI grid used for background and motion diffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiGrid {
    cells: Vec<u8>,
    size: usize,
}

impl RoiGrid {
    /// Reduces a raw ROI sample buffer to an `n`×`n` grid.
    pub fn from_samples(samples: &[u8], geometry: &RoiGeometry, n: usize) -> Self {
        let (w, h) = infer_raw_dims(samples.len(), geometry.expected_dims);
        Self {
            cells: reduce_to_grid(samples, w, h, n),
            size: n,
        }
    }

    /// Wraps already-reduced cells.
    pub fn from_cells(cells: Vec<u8>, size: usize) -> Self {
        Self { cells, size }
    }

    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Grid shape as `(width, height)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.size, self.size)
    }
}
