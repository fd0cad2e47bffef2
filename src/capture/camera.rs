//! Camera abstractions for frame analysis, still capture and focus.
//!
//! The engine never talks to sensor APIs. The platform layer implements
//! these traits; the mock implementations drive tests and the CLI.

use super::{CaptureStep, Frame};
use image::{GrayImage, Luma};
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),
    #[error("failed to open camera: {0}")]
    OpenFailed(String),
    #[error("failed to capture frame: {0}")]
    CaptureFailed(String),
    #[error("failed to save still image: {0}")]
    SaveFailed(String),
    #[error("camera not initialized")]
    NotInitialized,
    #[error("frame source exhausted")]
    Exhausted,
}

/// Source of live analysis frames.
pub trait FrameSource {
    /// Returns the next frame.
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Checks if the source can still produce frames.
    fn is_open(&self) -> bool;

    /// Releases the source.
    fn close(&mut self);
}

/// Full-resolution still capture, fulfilled by the platform camera.
pub trait CaptureCapability {
    /// Saves a still for `step` to `dest`.
    fn capture_still(&mut self, step: CaptureStep, dest: &Path) -> Result<(), CameraError>;
}

/// Autofocus/auto-exposure at a normalized point.
pub trait FocusCapability {
    fn request_focus(&mut self, point: (f32, f32));
}

/// Focus capability that does nothing.
#[derive(Debug, Default)]
pub struct NoopFocus;

impl FocusCapability for NoopFocus {
    fn request_focus(&mut self, point: (f32, f32)) {
        tracing::trace!(x = point.0, y = point.1, "Focus requested (ignored)");
    }
}

/// A card rectangle in normalized frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardPlacement {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Default for CardPlacement {
    fn default() -> Self {
        Self {
            left: 0.25,
            top: 0.22,
            right: 0.75,
            bottom: 0.78,
        }
    }
}

/// One segment of a scripted scene.
#[derive(Debug, Clone, Copy)]
pub struct SceneSegment {
    /// Number of frames in this segment.
    pub frames: u32,
    /// Card on the table, or an empty background.
    pub card: Option<CardPlacement>,
    /// Lens covered by a hand.
    pub obstructed: bool,
}

impl SceneSegment {
    pub fn empty(frames: u32) -> Self {
        Self {
            frames,
            card: None,
            obstructed: false,
        }
    }

    pub fn card(frames: u32) -> Self {
        Self {
            frames,
            card: Some(CardPlacement::default()),
            obstructed: false,
        }
    }

    pub fn obstructed(frames: u32) -> Self {
        Self {
            frames,
            card: None,
            obstructed: true,
        }
    }
}

/// Mock frame source that renders a scripted table-top scene.
///
/// The background is a soft horizontal gradient; a card is a bright
/// panel with dark text bands and a dark border.
#[derive(Debug)]
pub struct MockFrameSource {
    width: u32,
    height: u32,
    frame_interval_ms: u64,
    script: VecDeque<SceneSegment>,
    original: Vec<SceneSegment>,
    remaining_in_segment: u32,
    looping: bool,
    open: bool,
    sequence: u64,
}

impl MockFrameSource {
    /// Creates a source rendering `script` at the given frame rate.
    pub fn new(width: u32, height: u32, fps: u32, script: Vec<SceneSegment>) -> Self {
        let mut source = Self {
            width,
            height,
            frame_interval_ms: 1000 / u64::from(fps.max(1)),
            script: script.iter().copied().collect(),
            original: script,
            remaining_in_segment: 0,
            looping: false,
            open: true,
            sequence: 0,
        };
        source.remaining_in_segment = source.script.front().map_or(0, |s| s.frames);
        source
    }

    /// Restarts the script when it runs out.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    fn current_segment(&mut self) -> Option<SceneSegment> {
        while self.remaining_in_segment == 0 {
            self.script.pop_front();
            if self.script.is_empty() && self.looping && !self.original.is_empty() {
                self.script = self.original.iter().copied().collect();
            }
            self.remaining_in_segment = self.script.front()?.frames;
        }
        self.remaining_in_segment -= 1;
        self.script.front().copied()
    }

    fn render(&self, segment: &SceneSegment) -> Vec<u8> {
        render_scene(self.width, self.height, segment)
    }
}

/// Renders a scene segment into a packed luma buffer.
pub fn render_scene(width: u32, height: u32, segment: &SceneSegment) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    if segment.obstructed {
        return vec![14u8; w * h];
    }

    let mut pixels: Vec<u8> = (0..w * h)
        .map(|i| {
            let x = i % w;
            (96 + (x * 16) / w.max(1)) as u8
        })
        .collect();

    if let Some(card) = segment.card {
        let x0 = (card.left * width as f32) as usize;
        let x1 = ((card.right * width as f32) as usize).min(w);
        let y0 = (card.top * height as f32) as usize;
        let y1 = ((card.bottom * height as f32) as usize).min(h);
        let border = ((x1 - x0) / 18).max(2);
        for y in y0..y1 {
            for x in x0..x1 {
                let in_border =
                    x < x0 + border || x + border >= x1 || y < y0 + border || y + border >= y1;
                let band = ((y - y0) / 18) % 2 == 1 && ((x - x0) / 9) % 3 != 2;
                pixels[y * w + x] = if in_border {
                    28
                } else if band {
                    40
                } else {
                    226
                };
            }
        }
    }
    pixels
}

impl FrameSource for MockFrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        if !self.open {
            return Err(CameraError::NotInitialized);
        }
        let segment = self.current_segment().ok_or(CameraError::Exhausted)?;
        let pixels = self.render(&segment);

        let frame = Frame::new(pixels, self.width, self.height, self.sequence)
            .with_timestamp_ms(self.sequence * self.frame_interval_ms);
        self.sequence += 1;
        Ok(frame)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
        tracing::info!("MockFrameSource closed");
    }
}

/// Mock still camera that writes a synthetic card photo.
#[derive(Debug)]
pub struct MockStillCamera {
    width: u32,
    height: u32,
    /// Capture attempts that will fail before succeeding again.
    pub fail_next: u32,
}

impl MockStillCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fail_next: 0,
        }
    }
}

impl CaptureCapability for MockStillCamera {
    fn capture_still(&mut self, step: CaptureStep, dest: &Path) -> Result<(), CameraError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(CameraError::CaptureFailed("simulated sensor error".into()));
        }
        let segment = SceneSegment::card(1);
        let pixels = render_scene(self.width, self.height, &segment);
        let mut img = GrayImage::new(self.width, self.height);
        for (i, p) in img.pixels_mut().enumerate() {
            *p = Luma([pixels[i]]);
        }
        img.save(dest)
            .map_err(|e| CameraError::SaveFailed(e.to_string()))?;
        tracing::debug!(step = %step, path = %dest.display(), "MockStillCamera saved still");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_source_follows_script() {
        let mut source = MockFrameSource::new(
            64,
            48,
            25,
            vec![SceneSegment::empty(2), SceneSegment::card(1)],
        );

        let f0 = source.next_frame().unwrap();
        let f1 = source.next_frame().unwrap();
        let f2 = source.next_frame().unwrap();
        assert!(f0.is_valid());
        assert_eq!(f1.sequence(), 1);
        assert_eq!(f2.timestamp_ms(), 80);
        assert_eq!(f0.pixels(), f1.pixels());
        assert_ne!(f1.pixels(), f2.pixels());

        assert!(matches!(source.next_frame(), Err(CameraError::Exhausted)));
    }

    #[test]
    fn test_looping_source_never_exhausts() {
        let mut source =
            MockFrameSource::new(16, 16, 30, vec![SceneSegment::empty(1)]).looping(true);
        for _ in 0..5 {
            assert!(source.next_frame().is_ok());
        }
    }

    #[test]
    fn test_closed_source_errors() {
        let mut source = MockFrameSource::new(16, 16, 30, vec![SceneSegment::empty(3)]);
        source.close();
        assert!(!source.is_open());
        assert!(matches!(
            source.next_frame(),
            Err(CameraError::NotInitialized)
        ));
    }

    #[test]
    fn test_mock_still_failure_then_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        let mut camera = MockStillCamera::new(120, 160);
        camera.fail_next = 1;

        assert!(camera.capture_still(CaptureStep::Front, &path).is_err());
        camera.capture_still(CaptureStep::Front, &path).unwrap();
        assert!(path.exists());
    }
}
