//! Frame type representing one luma plane handed over by the camera.

/// A single analysis frame from the camera.
///
/// Holds the 8-bit luma plane exactly as the sensor delivered it, so
/// row and pixel strides are kept alongside the visible dimensions.
/// Rotation is the clockwise angle that turns the buffer upright.
#[derive(Clone)]
pub struct Frame {
    /// Raw luma bytes, possibly padded per row.
    pixels: Vec<u8>,
    /// Visible width in pixels.
    width: u32,
    /// Visible height in pixels.
    height: u32,
    /// Bytes between the starts of consecutive rows.
    row_stride: usize,
    /// Bytes between horizontally adjacent pixels.
    pixel_stride: usize,
    /// Clockwise rotation (0, 90, 180, 270) needed to display upright.
    rotation_degrees: u32,
    /// Monotonic capture time in milliseconds.
    timestamp_ms: u64,
    /// Monotonic sequence number.
    sequence: u64,
}

impl Frame {
    /// Creates a tightly packed frame (row stride = width, pixel stride = 1).
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            row_stride: width as usize,
            pixel_stride: 1,
            rotation_degrees: 0,
            timestamp_ms: 0,
            sequence,
        }
    }

    /// Creates a frame filled with a single luma value.
    pub fn uniform(value: u8, width: u32, height: u32, sequence: u64) -> Self {
        Self::new(
            vec![value; width as usize * height as usize],
            width,
            height,
            sequence,
        )
    }

    /// Sets explicit row and pixel strides.
    pub fn with_strides(mut self, row_stride: usize, pixel_stride: usize) -> Self {
        self.row_stride = row_stride;
        self.pixel_stride = pixel_stride.max(1);
        self
    }

    /// Sets the rotation metadata, normalized to a multiple of 90 degrees.
    pub fn with_rotation(mut self, degrees: u32) -> Self {
        self.rotation_degrees = (degrees / 90 % 4) * 90;
        self
    }

    /// Sets the capture timestamp.
    pub fn with_timestamp_ms(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    #[inline]
    pub fn pixel_stride(&self) -> usize {
        self.pixel_stride
    }

    #[inline]
    pub fn rotation_degrees(&self) -> u32 {
        self.rotation_degrees
    }

    #[inline]
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Luma at `(x, y)`.
    ///
    /// Offsets past the end of the buffer clamp to the last byte, the way
    /// camera planes with a short final row are read.
    #[inline]
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        let pos = y as usize * self.row_stride + x as usize * self.pixel_stride;
        match self.pixels.get(pos) {
            Some(&v) => v,
            None => self.pixels.last().copied().unwrap_or(0),
        }
    }

    /// Minimum buffer length needed to address every visible pixel.
    pub fn required_len(&self) -> usize {
        if self.width == 0 || self.height == 0 {
            return 0;
        }
        (self.height as usize - 1) * self.row_stride
            + (self.width as usize - 1) * self.pixel_stride
            + 1
    }

    /// Validates that the buffer covers the declared geometry.
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.row_stride >= (self.width as usize - 1) * self.pixel_stride + 1
            && self.pixels.len() >= self.required_len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("row_stride", &self.row_stride)
            .field("pixel_stride", &self.pixel_stride)
            .field("rotation", &self.rotation_degrees)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("sequence", &self.sequence)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}
