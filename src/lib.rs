//! Card Capture Library
//!
//! Auto-capture engine and photo validator for building a labeled image
//! dataset of trading cards. A live preview is watched for a card placed
//! in a fixed region; once it is present, still and sharp a full
//! resolution still is requested, checked for blur, framing and occlusion,
//! labeled and queued for upload.
//!
//! # Architecture
//!
//! ```text
//! capture → analysis → engine → still → validation → session → upload
//!                        ↓
//!                     metrics
//! ```
//!
//! # Design Principles
//!
//! - **One owner**: all decision state lives in [`CaptureEngine`], driven
//!   by a single analysis thread
//! - **Platform-free**: cameras, focus and text recognition are traits the
//!   host fulfils
//! - **Deterministic**: time comes from frame timestamps, never a wall clock
//! - **Durable uploads**: photos are deleted only after the server accepts them
//!
//! # Example
//!
//! ```no_run
//! use card_capture::{
//!     capture::{CaptureConfig, FrameSource, MockFrameSource, SceneSegment},
//!     engine::{CaptureEngine, EngineEvent},
//! };
//!
//! let mut source = MockFrameSource::new(
//!     640,
//!     480,
//!     30,
//!     vec![SceneSegment::empty(40), SceneSegment::card(120)],
//! );
//! let mut engine = CaptureEngine::new(CaptureConfig::default());
//! let mut events = Vec::<EngineEvent>::new();
//!
//! while let Ok(frame) = source.next_frame() {
//!     engine.analyze(&frame, &mut events);
//! }
//!
//! for event in &events {
//!     if let EngineEvent::TriggerCapture { step } = event {
//!         println!("take the {step} photo now");
//!     }
//! }
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod analysis;
pub mod capture;
pub mod dataset;
pub mod engine;
pub mod metrics;
pub mod session;
pub mod upload;
pub mod validation;

// Re-export commonly used types at crate root
pub use capture::{CaptureConfig, CaptureStep, FileConfig, Frame, MockFrameSource};
pub use dataset::{CardRecord, Grade};
pub use engine::{CaptureEngine, EngineEvent, Hint};
pub use session::{CardSession, SessionRuntime};
pub use upload::{UploadQueue, UploadWorker};
pub use validation::{PhotoValidator, ReasonCode, ValidationResult};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
