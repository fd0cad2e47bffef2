//! Upload job records.

use crate::dataset::{CardRecord, Grade};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Lifecycle of an upload job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Uploading,
        JobStatus::Uploaded,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Uploading => "UPLOADING",
            JobStatus::Uploaded => "UPLOADED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown job status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// One labeled card waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadJob {
    /// Assigned by the job store on insert.
    pub id: u64,
    pub created_at_ms: i64,
    pub status: JobStatus,
    /// Final (worst) grade.
    pub grade: Grade,
    pub front_grade: Grade,
    pub back_grade: Grade,
    pub front_path: PathBuf,
    pub back_path: PathBuf,
    pub base_id: String,
    pub device: String,
    pub retries: u32,
    pub last_error: Option<String>,
}

impl UploadJob {
    /// New pending job for a labeled card.
    pub fn from_record(record: &CardRecord, created_at_ms: i64) -> Self {
        Self {
            id: 0,
            created_at_ms,
            status: JobStatus::Pending,
            grade: record.final_grade,
            front_grade: record.front_grade,
            back_grade: record.back_grade,
            front_path: record.front_path.clone(),
            back_path: record.back_path.clone(),
            base_id: record.base_id.clone(),
            device: record.device.clone(),
            retries: 0,
            last_error: None,
        }
    }
}

/// JSON metadata sent alongside the photos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub job_id: u64,
    pub base_id: String,
    pub device: String,
    pub front_grade: Grade,
    pub back_grade: Grade,
    pub final_grade: Grade,
    pub created_at_ms: i64,
}

impl From<&UploadJob> for UploadMetadata {
    fn from(job: &UploadJob) -> Self {
        Self {
            job_id: job.id,
            base_id: job.base_id.clone(),
            device: job.device.clone(),
            front_grade: job.front_grade,
            back_grade: job.back_grade,
            final_grade: job.grade,
            created_at_ms: job.created_at_ms,
        }
    }
}
