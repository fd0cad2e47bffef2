//! Durable upload queue for labeled cards.
//!
//! Finalized [`CardRecord`](crate::dataset::CardRecord)s are queued as
//! [`UploadJob`]s and drained in batches by an [`UploadWorker`] through an
//! [`UploadTransport`]. A job that keeps failing is retried on later drains
//! until `max_retries` attempts have failed, after which it is `FAILED` and
//! its photos are kept.

#[cfg(feature = "http")]
mod http;
mod job;
mod queue;
mod sqlite;
mod store;
mod transport;
mod worker;

#[cfg(feature = "http")]
pub use http::HttpUploader;
pub use job::{JobStatus, ParseStatusError, UploadJob, UploadMetadata};
pub use queue::UploadQueue;
pub use sqlite::SqliteJobStore;
pub use store::{open_job_store, JobStore, JsonFileJobStore, MemoryJobStore};
pub use transport::{check_files, DirectoryTransport, UploadTransport};
pub use worker::{DrainReport, UploadWorker};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Default number of failed attempts before a job is `FAILED`.
pub const MAX_UPLOAD_RETRIES: u32 = 5;

/// Errors from the job store.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("queue database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("upload job {0} not found")]
    NotFound(u64),
}

/// Errors from a single upload attempt. The display text is what ends up
/// in a job's `last_error`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{side} file missing: {path}")]
    MissingFile { side: &'static str, path: String },
    #[error("HTTP {status} {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("client setup failed: {0}")]
    Build(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Upload settings, the `[upload]` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Endpoint receiving the multipart POST.
    pub url: String,
    /// Sent as a bearer token when set.
    pub token: Option<String>,
    /// PEM certificate to pin; disables the built-in roots.
    pub pinned_cert: Option<PathBuf>,
    pub max_retries: u32,
    /// Jobs attempted per drain.
    pub batch_limit: usize,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            pinned_cert: None,
            max_retries: MAX_UPLOAD_RETRIES,
            batch_limit: 20,
            connect_timeout_secs: 20,
            request_timeout_secs: 180,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UploadConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.batch_limit, 20);
        assert!(config.token.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config: UploadConfig = toml::from_str("url = \"https://example.test/up\"\nmax_retries = 3").unwrap();
        assert_eq!(config.url, "https://example.test/up");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.batch_limit, 20);
    }

    #[test]
    fn test_error_text() {
        let err = TransportError::Http {
            status: 413,
            body: "too large".into(),
        };
        assert_eq!(err.to_string(), "HTTP 413 too large");
        let err = TransportError::MissingFile {
            side: "front",
            path: "/x.jpg".into(),
        };
        assert_eq!(err.to_string(), "front file missing: /x.jpg");
    }
}
