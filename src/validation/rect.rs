//! Card rectangle detection from oriented edge projections.
//!
//! Strong gradients are split into vertical-edge and horizontal-edge
//! pixels and counted per column and per row. Card borders show up as
//! peaks in those projections; the best peak pair on each axis that
//! forms a card-shaped rectangle wins.

use super::{LumaImage, ValidatorConfig};

/// Inclusive pixel rectangle in validator image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardRect {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl CardRect {
    pub fn width(&self) -> usize {
        self.x1 - self.x0 + 1
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0 + 1
    }

    pub fn aspect(&self) -> f64 {
        self.width() as f64 / self.height().max(1) as f64
    }
}

/// True when `w / h` or its reciprocal falls inside the card window.
pub(crate) fn card_aspect(w: usize, h: usize, config: &ValidatorConfig) -> bool {
    let asp = w as f64 / h.max(1) as f64;
    let inv = 1.0 / asp.max(1e-6);
    let window = config.rect_aspect_min..=config.rect_aspect_max;
    window.contains(&asp) || window.contains(&inv)
}

/// Finds the most card-like rectangle, if any.
pub fn detect_card_rect(img: &LumaImage, config: &ValidatorConfig) -> Option<CardRect> {
    let (w, h) = (img.width(), img.height());
    if w < 16 || h < 16 {
        return None;
    }

    let p90 = img.gradient_percentile(0.9)?;
    let thr = config
        .rect_edge_floor
        .max((f64::from(p90) * config.rect_edge_factor) as u32);

    // Index i holds pixel coordinate i + 1
    let mut vproj = vec![0u32; w - 2];
    let mut hproj = vec![0u32; h - 2];
    img.for_each_gradient(|x, y, dx, dy| {
        let (ax, ay) = (dx.unsigned_abs(), dy.unsigned_abs());
        if ax + ay < thr {
            return;
        }
        if ax > ay {
            vproj[x - 1] += 1;
        } else {
            hproj[y - 1] += 1;
        }
    });

    let v = smooth(&vproj, config.smooth_window);
    let hp = smooth(&hproj, config.smooth_window);
    let xs = top_k_peaks(&v, config.peaks_k, config.peak_min_sep);
    let ys = top_k_peaks(&hp, config.peaks_k, config.peak_min_sep);
    if xs.len() < 2 || ys.len() < 2 {
        return None;
    }

    let mut best: Option<(f64, CardRect)> = None;
    for (a, &xa) in xs.iter().enumerate() {
        for &xb in &xs[a + 1..] {
            let (xl, xr) = (xa.min(xb), xa.max(xb));
            let bw = xr - xl;
            if bw < config.min_rect_w {
                continue;
            }
            for (c, &ya) in ys.iter().enumerate() {
                for &yb in &ys[c + 1..] {
                    let (yt, yb) = (ya.min(yb), ya.max(yb));
                    let bh = yb - yt;
                    if bh < config.min_rect_h || !card_aspect(bw, bh, config) {
                        continue;
                    }
                    let score = f64::from(v[xl] + v[xr] + hp[yt] + hp[yb])
                        + config.rect_area_weight * (bw * bh) as f64;
                    if best.map_or(true, |(s, _)| score > s) {
                        best = Some((
                            score,
                            CardRect {
                                x0: xl + 1,
                                y0: yt + 1,
                                x1: xr + 1,
                                y1: yb + 1,
                            },
                        ));
                    }
                }
            }
        }
    }
    best.map(|(_, rect)| rect)
}

/// Centered moving average, shrinking the window at the ends.
pub(crate) fn smooth(values: &[u32], window: usize) -> Vec<u32> {
    if window <= 1 || values.len() < window {
        return values.to_vec();
    }
    let half = window / 2;
    let mut prefix = Vec::with_capacity(values.len() + 1);
    prefix.push(0u64);
    for &v in values {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + u64::from(v));
    }
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            ((prefix[hi] - prefix[lo]) / (hi - lo) as u64) as u32
        })
        .collect()
}

/// Up to `k` indices of the largest positive values, at least `min_sep` apart.
pub fn top_k_peaks(values: &[u32], k: usize, min_sep: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].cmp(&values[a]).then(a.cmp(&b)));

    let mut peaks = Vec::with_capacity(k);
    for i in order {
        if values[i] == 0 || peaks.len() >= k {
            break;
        }
        if peaks.iter().all(|&p: &usize| p.abs_diff(i) >= min_sep) {
            peaks.push(i);
        }
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bright 200×300 panel with a dark frame on a mid-gray table.
    fn framed_card() -> LumaImage {
        LumaImage::from_fn(400, 480, |x, y| {
            let inside = (100..300).contains(&x) && (90..390).contains(&y);
            let border = inside && !((112..288).contains(&x) && (102..378).contains(&y));
            if border {
                30
            } else if inside {
                220
            } else {
                120
            }
        })
    }

    #[test]
    fn test_detects_framed_card() {
        let rect = detect_card_rect(&framed_card(), &ValidatorConfig::default()).unwrap();
        // Peaks sit on the smoothed border bands
        assert!((95..=115).contains(&rect.x0), "{rect:?}");
        assert!((285..=305).contains(&rect.x1), "{rect:?}");
        assert!((85..=105).contains(&rect.y0), "{rect:?}");
        assert!((375..=395).contains(&rect.y1), "{rect:?}");
        assert!(card_aspect(rect.width(), rect.height(), &ValidatorConfig::default()));
    }

    #[test]
    fn test_flat_image_has_no_rect() {
        let img = LumaImage::from_fn(200, 200, |_, _| 90);
        assert_eq!(detect_card_rect(&img, &ValidatorConfig::default()), None);
    }

    #[test]
    fn test_square_rejected_by_aspect() {
        let config = ValidatorConfig::default();
        assert!(!card_aspect(200, 200, &config));
        assert!(card_aspect(200, 280, &config));
        assert!(card_aspect(280, 200, &config));
    }

    #[test]
    fn test_top_k_peaks_respects_separation() {
        let values = [0, 9, 10, 8, 0, 0, 0, 7, 0, 0];
        assert_eq!(top_k_peaks(&values, 5, 3), vec![2, 7]);
        assert_eq!(top_k_peaks(&values, 1, 3), vec![2]);
        assert!(top_k_peaks(&[0, 0, 0], 5, 1).is_empty());
    }

    #[test]
    fn test_smooth_preserves_constant() {
        assert_eq!(smooth(&[5; 40], 17), vec![5; 40]);
        // Too short to smooth
        assert_eq!(smooth(&[1, 2, 3], 17), vec![1, 2, 3]);
    }
}
