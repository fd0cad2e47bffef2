//! Camera input and frame handling.
//!
//! Frames are opaque luma rasters owned by the source for the duration of
//! one analysis call. Still capture and focus are capabilities the
//! platform fulfils; the engine only asks for them.

mod camera;
mod config;
mod frame;
mod step;

pub use camera::{
    render_scene, CameraError, CaptureCapability, CardPlacement, FocusCapability, FrameSource,
    MockFrameSource, MockStillCamera, NoopFocus, SceneSegment,
};
pub use config::{
    CaptureConfig, ConfigError, FileConfig, ObstructionConfig, PresenceThresholds, RoiNorm,
    SwapMode, TextGateConfig,
};
pub use frame::Frame;
pub use step::CaptureStep;
