//! Card labeling workflow on top of the capture engine.
//!
//! FRONT accepted → graded → BACK accepted → graded → the card is written
//! to the staging area and queued for upload. The final grade is the worse
//! of the two sides.

mod card;
mod worker;

pub use card::CardSession;
pub use worker::{
    SessionCommand, SessionEvent, SessionRuntime, SessionSetup, SessionStats, SessionWorker,
};

use crate::capture::CaptureStep;
use crate::dataset::DatasetError;
use crate::upload::QueueError;
use thiserror::Error;

/// Errors from the card workflow.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no accepted {0} photo")]
    MissingPhoto(CaptureStep),
    #[error("{0} photo has no grade")]
    MissingGrade(CaptureStep),
    #[error("card has no base id")]
    NoBaseId,
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("{0} worker panicked")]
    WorkerPanicked(&'static str),
}
