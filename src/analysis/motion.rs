//! Grid-to-grid difference measures.

/// Motion reported when there is no reference grid to compare with.
pub const NO_REFERENCE_MOTION: f64 = 999.0;

/// Mean absolute per-cell difference between two grids.
///
/// Compares the overlapping prefix when lengths differ. Returns
/// [`NO_REFERENCE_MOTION`] when either grid is empty.
pub fn motion_score(a: &[u8], b: &[u8]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return NO_REFERENCE_MOTION;
    }
    let sum: u64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| u64::from(x.abs_diff(y)))
        .sum();
    sum as f64 / n as f64
}

/// Fraction of cells whose absolute difference exceeds `cell_threshold`.
///
/// Separates a solid object covering the ROI from small scattered noise
/// that produces a similar mean difference.
pub fn coverage(a: &[u8], b: &[u8], cell_threshold: u8) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let covered = a
        .iter()
        .zip(b.iter())
        .filter(|&(&x, &y)| x.abs_diff(y) > cell_threshold)
        .count();
    covered as f64 / n as f64
}
