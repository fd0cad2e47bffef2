//! Prometheus metrics for the capture pipeline.
//!
//! # Metrics Exposed
//!
//! ## Engine
//! - `card_capture_frames_analyzed_total`, `card_capture_frames_dropped_total`,
//!   `card_capture_frames_obstructed_total`, `card_capture_analysis_faults_total`
//! - `card_capture_calibrations_total`, `card_capture_triggers_total`,
//!   `card_capture_focus_requests_total`
//!
//! ## Session and validation
//! - `card_capture_photos_accepted_total`, `card_capture_photos_rejected_total`
//! - `card_capture_still_failures_total`, `card_capture_cards_queued_total`
//! - `card_capture_validation_results_total{reason}`
//!
//! ## Upload
//! - `card_capture_upload_jobs{status}`
//!
//! # Example
//!
//! ```no_run
//! use card_capture::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! registry.update(&MetricsSnapshot::default());
//! println!("{}", registry.encode().unwrap());
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot, QueueCounts};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig};
