//! Grayscale raster used by the photo validator.

use super::ValidationError;
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::Path;

/// Row-major 8-bit luma image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LumaImage {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl LumaImage {
    /// Wraps a row-major luma buffer of exactly `width * height` bytes.
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self, ValidationError> {
        if data.len() != width * height {
            return Err(ValidationError::BufferSize {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Builds an image from a function of the pixel position.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> u8) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Converts with the integer weighting `(3r + 4g + b) / 8`.
    pub fn from_dynamic(img: &DynamicImage) -> Self {
        let rgb = img.to_rgb8();
        let (w, h) = (rgb.width() as usize, rgb.height() as usize);
        let data = rgb
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                ((u32::from(r) * 3 + u32::from(g) * 4 + u32::from(b)) / 8) as u8
            })
            .collect();
        Self {
            width: w,
            height: h,
            data,
        }
    }

    /// Decodes an image file, halving it until the longest edge fits `max_dim`.
    pub fn decode_downsampled(path: &Path, max_dim: u32) -> Result<Self, ValidationError> {
        let img = image::open(path).map_err(|e| ValidationError::Decode(e.to_string()))?;
        let (mut w, mut h) = (img.width(), img.height());
        if w == 0 || h == 0 {
            return Err(ValidationError::Decode("image has zero size".into()));
        }
        while w.max(h) > max_dim.max(1) {
            w /= 2;
            h /= 2;
        }
        let img = if (w, h) == (img.width(), img.height()) {
            img
        } else {
            tracing::trace!(from_w = img.width(), from_h = img.height(), w, h, "Downsampling still");
            img.resize_exact(w.max(1), h.max(1), FilterType::Triangle)
        };
        Ok(Self::from_dynamic(&img))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> i32 {
        i32::from(self.data[y * self.width + x])
    }

    /// Centered differences `(dx, dy)` at an interior pixel.
    #[inline]
    pub fn gradient(&self, x: usize, y: usize) -> (i32, i32) {
        (
            self.at(x + 1, y) - self.at(x - 1, y),
            self.at(x, y + 1) - self.at(x, y - 1),
        )
    }

    /// Calls `f(x, y, dx, dy)` for every interior pixel.
    pub fn for_each_gradient(&self, mut f: impl FnMut(usize, usize, i32, i32)) {
        if self.width < 3 || self.height < 3 {
            return;
        }
        for y in 1..self.height - 1 {
            for x in 1..self.width - 1 {
                let (dx, dy) = self.gradient(x, y);
                f(x, y, dx, dy);
            }
        }
    }

    /// Gradient magnitude `|dx| + |dy|` at quantile `q` over interior pixels.
    ///
    /// Magnitudes are histogrammed in 512 bins; `None` without an interior.
    pub fn gradient_percentile(&self, q: f64) -> Option<u32> {
        let mut hist = [0u32; 512];
        let mut n = 0usize;
        self.for_each_gradient(|_, _, dx, dy| {
            let mag = (dx.unsigned_abs() + dy.unsigned_abs()).min(511);
            hist[mag as usize] += 1;
            n += 1;
        });
        if n == 0 {
            return None;
        }
        let target = ((n as f64 * q) as usize).max(1);
        let mut acc = 0usize;
        for (mag, &count) in hist.iter().enumerate() {
            acc += count as usize;
            if acc >= target {
                return Some(mag as u32);
            }
        }
        Some(511)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_gray_weighting() {
        let img = RgbImage::from_pixel(2, 1, Rgb([80, 160, 240]));
        let luma = LumaImage::from_dynamic(&DynamicImage::ImageRgb8(img));
        // (240 + 640 + 240) / 8
        assert_eq!(luma.data(), &[140, 140]);
    }

    #[test]
    fn test_buffer_size_checked() {
        assert!(LumaImage::new(4, 4, vec![0; 15]).is_err());
        assert!(LumaImage::new(4, 4, vec![0; 16]).is_ok());
    }

    #[test]
    fn test_percentile_of_step_image() {
        // Vertical step of 100 at x = 5: interior columns 4 and 5 see |dx| = 100
        let img = LumaImage::from_fn(10, 10, |x, _| if x < 5 { 0 } else { 100 });
        assert_eq!(img.gradient_percentile(0.5), Some(0));
        assert_eq!(img.gradient_percentile(0.9), Some(100));
    }

    #[test]
    fn test_decode_halves_until_within_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        image::GrayImage::from_pixel(1600, 1000, image::Luma([90]))
            .save(&path)
            .unwrap();

        let img = LumaImage::decode_downsampled(&path, 720).unwrap();
        assert_eq!((img.width(), img.height()), (400, 250));
        assert!(img.data().iter().all(|&v| v == 90));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();
        assert!(matches!(
            LumaImage::decode_downsampled(&path, 720),
            Err(ValidationError::Decode(_))
        ));
    }
}
