//! Dataset bookkeeping: grades, capture ids, staging and card records.

mod grade;
mod id;
mod staging;

pub use grade::{Grade, ParseGradeError};
pub use id::{
    base_id_of, image_file_name, normalize_side, sanitize_device_tag, CaptureIdGenerator,
    FileCounter, MemoryCounter, SequenceCounter,
};
pub use staging::StagingPaths;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors from dataset storage.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sequence counter file is corrupt: {0}")]
    CounterCorrupt(String),
    #[error("failed to encode metadata: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A fully labeled card: both photos and their grades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    pub base_id: String,
    pub device: String,
    pub front_path: PathBuf,
    pub back_path: PathBuf,
    pub front_grade: Grade,
    pub back_grade: Grade,
    /// Worst of the two side grades.
    pub final_grade: Grade,
    pub created_at_ms: i64,
}

impl CardRecord {
    /// Writes the record as pretty JSON into the staging meta directory.
    pub fn write_meta(&self, staging: &StagingPaths) -> Result<PathBuf, DatasetError> {
        let path = staging.meta_file(&self.base_id)?;
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_meta_written() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingPaths::new(dir.path());
        let record = CardRecord {
            base_id: "20260101_000000_000_dev_000001".into(),
            device: "dev".into(),
            front_path: staging.image_file("b", "front").unwrap(),
            back_path: staging.image_file("b", "back").unwrap(),
            front_grade: Grade::NearMint,
            back_grade: Grade::HeavilyPlayed,
            final_grade: Grade::HeavilyPlayed,
            created_at_ms: 1,
        };

        let path = record.write_meta(&staging).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\"final_grade\": \"HP\""));
        let back: CardRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }
}
