//! Empty-scene background baseline.
//!
//! The calibrator accumulates ROI grids of the empty scene. Once enough
//! still frames are in, the per-cell mean becomes the baseline and the
//! accumulated frames are replayed against it to measure sensor noise.
//! The noise sets the swap and tracking thresholds.

use crate::analysis::{motion_score, RoiGrid};
use crate::capture::CaptureConfig;

/// Thresholds derived from measured noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseParams {
    /// Standard deviations above mean noise for the swap threshold.
    pub k: f64,
    /// Constant added to the swap threshold.
    pub margin: f64,
    /// Tracking threshold as a multiple of the swap threshold.
    pub track_multiplier: f64,
}

impl NoiseParams {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            k: config.noise_k,
            margin: config.noise_margin,
            track_multiplier: config.track_multiplier,
        }
    }
}

/// Per-cell luma baseline of the empty scene.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundModel {
    baseline: Vec<f32>,
    cells: Vec<u8>,
    size: usize,
    noise_mean: f64,
    noise_std: f64,
    swap_threshold: f64,
    track_threshold: f64,
}

impl BackgroundModel {
    /// Builds a model from a precomputed baseline and noise measurement.
    pub fn new(baseline: Vec<f32>, size: usize, noise_mean: f64, noise_std: f64, params: &NoiseParams) -> Self {
        let swap_threshold = noise_mean + params.k * noise_std + params.margin;
        let cells = quantize(&baseline);
        Self {
            baseline,
            cells,
            size,
            noise_mean,
            noise_std,
            swap_threshold,
            track_threshold: swap_threshold * params.track_multiplier,
        }
    }

    /// Builds a model from whole-valued cells.
    pub fn from_cells(cells: &[u8], size: usize, noise_mean: f64, noise_std: f64, params: &NoiseParams) -> Self {
        let baseline = cells.iter().map(|&c| f32::from(c)).collect();
        Self::new(baseline, size, noise_mean, noise_std, params)
    }

    /// Baseline rounded to luma values, for diffing.
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Unrounded per-cell baseline.
    pub fn baseline(&self) -> &[f32] {
        &self.baseline
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.size, self.size)
    }

    pub fn matches(&self, grid: &RoiGrid) -> bool {
        grid.shape() == self.shape() && grid.cells().len() == self.cells.len()
    }

    pub fn noise_mean(&self) -> f64 {
        self.noise_mean
    }

    pub fn noise_std(&self) -> f64 {
        self.noise_std
    }

    /// Background diff at or below which the scene counts as empty.
    pub fn swap_threshold(&self) -> f64 {
        self.swap_threshold
    }

    /// Background diff below which the baseline follows the scene.
    pub fn track_threshold(&self) -> f64 {
        self.track_threshold
    }

    /// Mean absolute difference between `grid` and the baseline.
    pub fn diff(&self, grid: &RoiGrid) -> f64 {
        motion_score(&self.cells, grid.cells())
    }

    /// Moves the baseline towards `grid` by `alpha` (exponential moving average).
    pub fn track(&mut self, grid: &RoiGrid, alpha: f64) {
        if !self.matches(grid) {
            return;
        }
        let a = alpha.clamp(0.0, 1.0) as f32;
        for ((b, c), &g) in self
            .baseline
            .iter_mut()
            .zip(self.cells.iter_mut())
            .zip(grid.cells())
        {
            *b += (f32::from(g) - *b) * a;
            *c = quantize_one(*b);
        }
    }
}

fn quantize_one(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn quantize(values: &[f32]) -> Vec<u8> {
    values.iter().map(|&v| quantize_one(v)).collect()
}

/// Accumulates empty-scene grids into a [`BackgroundModel`].
#[derive(Debug, Clone)]
pub struct Calibrator {
    need: u32,
    sums: Vec<u32>,
    frames: Vec<Vec<u8>>,
    shape: Option<(usize, usize)>,
}

impl Calibrator {
    pub fn new(need_frames: u32) -> Self {
        Self {
            need: need_frames.max(1),
            sums: Vec::new(),
            frames: Vec::new(),
            shape: None,
        }
    }

    /// Frames accepted since the last reset.
    pub fn accepted(&self) -> u32 {
        self.frames.len() as u32
    }

    pub fn need(&self) -> u32 {
        self.need
    }

    pub fn is_complete(&self) -> bool {
        self.accepted() >= self.need
    }

    pub fn reset(&mut self) {
        self.sums.clear();
        self.frames.clear();
        self.shape = None;
    }

    /// Adds one still grid. A grid of a different shape restarts the
    /// accumulation with this grid as its first frame.
    pub fn accumulate(&mut self, grid: &RoiGrid) -> u32 {
        let cells = grid.cells();
        if cells.is_empty() {
            return self.accepted();
        }
        if self.shape != Some(grid.shape()) || self.sums.len() != cells.len() {
            if self.shape.is_some() {
                tracing::debug!(
                    old = ?self.shape,
                    new = ?grid.shape(),
                    "Calibration grid shape changed; restarting accumulation"
                );
            }
            self.reset();
            self.shape = Some(grid.shape());
            self.sums = vec![0; cells.len()];
        }
        for (s, &c) in self.sums.iter_mut().zip(cells) {
            *s += u32::from(c);
        }
        self.frames.push(cells.to_vec());
        self.accepted()
    }

    /// Builds the model once enough frames are in.
    ///
    /// Returns `None` while incomplete. Resets the accumulator on success.
    pub fn finalize(&mut self, params: &NoiseParams) -> Option<BackgroundModel> {
        if !self.is_complete() {
            return None;
        }
        let (size, _) = self.shape?;
        let count = self.frames.len() as f32;
        let baseline: Vec<f32> = self.sums.iter().map(|&s| s as f32 / count).collect();
        // Noise is measured against the rounded cells, the same values
        // `diff` compares live grids with.
        let cells = quantize(&baseline);

        let distances: Vec<f64> = self
            .frames
            .iter()
            .map(|f| motion_score(&cells, f))
            .collect();
        let n = distances.len() as f64;
        let mean = distances.iter().sum::<f64>() / n;
        let var = distances.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;

        let model = BackgroundModel::new(baseline, size, mean, var.sqrt(), params);
        self.reset();
        Some(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NoiseParams {
        NoiseParams {
            k: 4.5,
            margin: 0.8,
            track_multiplier: 1.35,
        }
    }

    fn grid(value: u8, size: usize) -> RoiGrid {
        RoiGrid::from_cells(vec![value; size * size], size)
    }

    #[test]
    fn test_baseline_is_per_cell_mean() {
        let mut cal = Calibrator::new(4);
        for v in [100, 102, 100, 102] {
            cal.accumulate(&grid(v, 4));
        }
        assert!(cal.is_complete());

        let model = cal.finalize(&params()).unwrap();
        assert!(model.baseline().iter().all(|&b| (b - 101.0).abs() < 1e-6));
        assert_eq!(model.cells(), &[101u8; 16][..]);
        // Every frame is exactly one unit away
        assert!((model.noise_mean() - 1.0).abs() < 1e-12);
        assert_eq!(model.noise_std(), 0.0);
        assert!((model.swap_threshold() - 1.8).abs() < 1e-12);
        assert!((model.track_threshold() - 1.8 * 1.35).abs() < 1e-12);
        assert_eq!(cal.accepted(), 0);
    }

    #[test]
    fn test_noise_measured_against_rounded_cells() {
        let mut cal = Calibrator::new(3);
        for v in [100, 101, 101] {
            cal.accumulate(&grid(v, 2));
        }
        let model = cal.finalize(&params()).unwrap();

        // Mean 100.67 rounds to 101: distances are 1, 0, 0.
        assert_eq!(model.cells(), &[101u8; 4][..]);
        assert!((model.noise_mean() - 1.0 / 3.0).abs() < 1e-12);
        let std = (2.0f64 / 9.0).sqrt();
        assert!((model.noise_std() - std).abs() < 1e-12);
        assert_eq!(model.diff(&grid(101, 2)), 0.0);
    }

    #[test]
    fn test_finalize_waits_for_enough_frames() {
        let mut cal = Calibrator::new(3);
        cal.accumulate(&grid(50, 4));
        cal.accumulate(&grid(50, 4));
        assert!(cal.finalize(&params()).is_none());
        assert_eq!(cal.accepted(), 2);
    }

    #[test]
    fn test_shape_change_restarts() {
        let mut cal = Calibrator::new(3);
        cal.accumulate(&grid(50, 4));
        cal.accumulate(&grid(50, 4));
        assert_eq!(cal.accumulate(&grid(50, 8)), 1);
    }

    #[test]
    fn test_tracking_moves_towards_scene() {
        let mut model = BackgroundModel::from_cells(&[100u8; 4], 2, 0.5, 0.1, &params());
        let bright = grid(200, 2);
        model.track(&bright, 0.1);
        assert!(model.baseline().iter().all(|&b| (b - 110.0).abs() < 1e-4));
        assert_eq!(model.cells(), &[110u8; 4][..]);

        // Mismatched shape is ignored
        model.track(&grid(0, 3), 1.0);
        assert_eq!(model.cells(), &[110u8; 4][..]);
    }

    #[test]
    fn test_diff_against_baseline() {
        let model = BackgroundModel::from_cells(&[100u8; 16], 4, 0.0, 0.0, &params());
        assert_eq!(model.diff(&grid(125, 4)), 25.0);
        assert!(model.matches(&grid(0, 4)));
        assert!(!model.matches(&grid(0, 5)));
    }
}
