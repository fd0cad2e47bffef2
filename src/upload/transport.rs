//! Upload transports.

use super::{TransportError, UploadJob};
use std::path::Path;

/// Sends one job's photos and metadata somewhere.
pub trait UploadTransport {
    fn upload(&self, job: &UploadJob) -> Result<(), TransportError>;
}

impl<T: UploadTransport + ?Sized> UploadTransport for &T {
    fn upload(&self, job: &UploadJob) -> Result<(), TransportError> {
        (**self).upload(job)
    }
}

impl<T: UploadTransport + ?Sized> UploadTransport for Box<T> {
    fn upload(&self, job: &UploadJob) -> Result<(), TransportError> {
        (**self).upload(job)
    }
}

/// Fails with [`TransportError::MissingFile`] unless both photos exist.
pub fn check_files(job: &UploadJob) -> Result<(), TransportError> {
    for (side, path) in [("front", &job.front_path), ("back", &job.back_path)] {
        if !path.is_file() {
            return Err(TransportError::MissingFile {
                side,
                path: path.display().to_string(),
            });
        }
    }
    Ok(())
}

/// Copies photos and a metadata file into a directory.
///
/// Used for offline export and tests.
#[derive(Debug, Clone)]
pub struct DirectoryTransport {
    dir: std::path::PathBuf,
}

impl DirectoryTransport {
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl UploadTransport for DirectoryTransport {
    fn upload(&self, job: &UploadJob) -> Result<(), TransportError> {
        check_files(job)?;
        std::fs::create_dir_all(&self.dir)?;
        for src in [&job.front_path, &job.back_path] {
            if let Some(name) = src.file_name() {
                std::fs::copy(src, self.dir.join(name))?;
            }
        }
        let meta = super::UploadMetadata::from(job);
        let body = serde_json::to_vec_pretty(&meta)
            .map_err(|e| TransportError::Request(e.to_string()))?;
        std::fs::write(self.dir.join(format!("{}.json", job.base_id)), body)?;
        Ok(())
    }
}

/// Truncates a response body to `max` characters for diagnostics.
pub(crate) fn truncate_body(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{CardRecord, Grade};

    fn job_in(dir: &Path, write_back: bool) -> UploadJob {
        let front = dir.join("c_front.jpg");
        let back = dir.join("c_back.jpg");
        std::fs::write(&front, b"front").unwrap();
        if write_back {
            std::fs::write(&back, b"back").unwrap();
        }
        let record = CardRecord {
            base_id: "c".into(),
            device: "dev".into(),
            front_path: front,
            back_path: back,
            front_grade: Grade::NearMint,
            back_grade: Grade::Damaged,
            final_grade: Grade::Damaged,
            created_at_ms: 0,
        };
        let mut job = UploadJob::from_record(&record, 0);
        job.id = 7;
        job
    }

    #[test]
    fn test_missing_back_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path(), false);
        let err = check_files(&job).unwrap_err();
        assert!(err.to_string().starts_with("back file missing: "));
    }

    #[test]
    fn test_directory_transport_exports() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let job = job_in(dir.path(), true);

        DirectoryTransport::new(&out).upload(&job).unwrap();
        assert_eq!(std::fs::read(out.join("c_back.jpg")).unwrap(), b"back");
        let meta = std::fs::read_to_string(out.join("c.json")).unwrap();
        assert!(meta.contains("\"final_grade\": \"D\""));
        assert!(meta.contains("\"job_id\": 7"));
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("abcdef", 4), "abcd");
        assert_eq!(truncate_body("ab", 400), "ab");
        assert_eq!(truncate_body(&"é".repeat(500), 400).chars().count(), 400);
    }
}
