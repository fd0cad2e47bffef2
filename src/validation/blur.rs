//! Laplacian-variance sharpness measure.

use super::LumaImage;

/// Variance of the 4-neighbour Laplacian over interior pixels.
///
/// Low values mean few sharp transitions. Images without an interior
/// report zero.
pub fn laplacian_variance(img: &LumaImage) -> f64 {
    let (w, h) = (img.width(), img.height());
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum2 = 0.0f64;
    let mut n = 0usize;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = 4 * img.at(x, y)
                - img.at(x - 1, y)
                - img.at(x + 1, y)
                - img.at(x, y - 1)
                - img.at(x, y + 1);
            let v = f64::from(lap);
            sum += v;
            sum2 += v * v;
            n += 1;
        }
    }
    if n <= 1 {
        return 0.0;
    }
    let mean = sum / n as f64;
    sum2 / n as f64 - mean * mean
}
