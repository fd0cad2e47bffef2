//! Batch drain of the upload queue.

use super::{JobStatus, JobStore, QueueError, UploadQueue, UploadTransport};
use crate::dataset::StagingPaths;
use std::fmt;

/// Outcome of one [`UploadWorker::drain`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub retried: usize,
    pub failed: usize,
    /// Jobs still pending after the drain.
    pub remaining: usize,
}

impl DrainReport {
    /// Whether another drain should be scheduled.
    pub fn needs_retry(&self) -> bool {
        self.remaining > 0
    }
}

impl fmt::Display for DrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempted={} uploaded={} retried={} failed={} remaining={}",
            self.attempted, self.uploaded, self.retried, self.failed, self.remaining
        )
    }
}

/// Pushes pending jobs through a transport.
#[derive(Debug)]
pub struct UploadWorker<S, T> {
    queue: UploadQueue<S>,
    transport: T,
    max_retries: u32,
    batch_limit: usize,
}

impl<S: JobStore, T: UploadTransport> UploadWorker<S, T> {
    pub fn new(queue: UploadQueue<S>, transport: T, max_retries: u32, batch_limit: usize) -> Self {
        Self {
            queue,
            transport,
            max_retries: max_retries.max(1),
            batch_limit: batch_limit.max(1),
        }
    }

    pub fn queue(&self) -> &UploadQueue<S> {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut UploadQueue<S> {
        &mut self.queue
    }

    /// Uploads a snapshot of up to `batch_limit` pending jobs, oldest
    /// first. Each job is attempted at most once per drain. Photos are
    /// deleted only after a successful upload.
    pub fn drain(&mut self) -> Result<DrainReport, QueueError> {
        self.queue.recover_interrupted()?;
        let batch = self.queue.next_pending(self.batch_limit)?;
        let mut report = DrainReport::default();

        for job in batch {
            report.attempted += 1;
            self.queue.mark_uploading(job.id)?;

            match self.transport.upload(&job) {
                Ok(()) => {
                    self.queue.mark_uploaded(job.id)?;
                    StagingPaths::discard(&job.front_path);
                    StagingPaths::discard(&job.back_path);
                    report.uploaded += 1;
                    tracing::info!(job = job.id, base_id = %job.base_id, "Uploaded");
                }
                Err(e) => match self.queue.retry_or_fail(job.id, &e.to_string(), self.max_retries)? {
                    JobStatus::Failed => report.failed += 1,
                    _ => report.retried += 1,
                },
            }
        }

        report.remaining = self.queue.count_by_status(JobStatus::Pending)?;
        tracing::debug!(%report, "Upload drain finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{CardRecord, Grade};
    use crate::upload::{MemoryJobStore, TransportError, UploadJob};
    use std::cell::Cell;
    use std::path::Path;

    struct Flaky {
        failures_left: Cell<u32>,
        calls: Cell<u32>,
    }

    impl Flaky {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: Cell::new(times),
                calls: Cell::new(0),
            }
        }
    }

    impl UploadTransport for Flaky {
        fn upload(&self, _job: &UploadJob) -> Result<(), TransportError> {
            self.calls.set(self.calls.get() + 1);
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                return Err(TransportError::Http {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            Ok(())
        }
    }

    fn staged_record(dir: &Path, base: &str) -> CardRecord {
        let front = dir.join(format!("{base}_front.jpg"));
        let back = dir.join(format!("{base}_back.jpg"));
        std::fs::write(&front, b"f").unwrap();
        std::fs::write(&back, b"b").unwrap();
        CardRecord {
            base_id: base.into(),
            device: "dev".into(),
            front_path: front,
            back_path: back,
            front_grade: Grade::NearMint,
            back_grade: Grade::NearMint,
            final_grade: Grade::NearMint,
            created_at_ms: 0,
        }
    }

    #[test]
    fn test_success_deletes_photos() {
        let dir = tempfile::tempdir().unwrap();
        let record = staged_record(dir.path(), "a");
        let mut queue = UploadQueue::new(MemoryJobStore::new());
        let id = queue.enqueue(&record, 1).unwrap();

        let mut worker = UploadWorker::new(queue, Flaky::failing(0), 5, 20);
        let report = worker.drain().unwrap();
        assert_eq!(report.uploaded, 1);
        assert!(!report.needs_retry());
        assert_eq!(worker.queue().get(id).unwrap().unwrap().status, JobStatus::Uploaded);
        assert!(!record.front_path.exists());
        assert!(!record.back_path.exists());
    }

    #[test]
    fn test_four_failures_then_success() {
        let dir = tempfile::tempdir().unwrap();
        let record = staged_record(dir.path(), "a");
        let mut queue = UploadQueue::new(MemoryJobStore::new());
        let id = queue.enqueue(&record, 1).unwrap();

        let mut worker = UploadWorker::new(queue, Flaky::failing(4), 5, 20);
        for _ in 0..4 {
            let report = worker.drain().unwrap();
            assert_eq!(report.retried, 1);
            assert!(record.front_path.exists());
        }
        let report = worker.drain().unwrap();
        assert_eq!(report.uploaded, 1);

        let job = worker.queue().get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Uploaded);
        assert_eq!(job.retries, 4);
    }

    #[test]
    fn test_one_attempt_per_drain() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = UploadQueue::new(MemoryJobStore::new());
        for (i, base) in ["a", "b", "c"].iter().enumerate() {
            queue.enqueue(&staged_record(dir.path(), base), i as i64).unwrap();
        }

        let transport = Flaky::failing(u32::MAX);
        let mut worker = UploadWorker::new(queue, &transport, 5, 2);
        let report = worker.drain().unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(transport.calls.get(), 2);
        assert_eq!(report.remaining, 3);
    }

    #[test]
    fn test_failure_keeps_photos() {
        let dir = tempfile::tempdir().unwrap();
        let record = staged_record(dir.path(), "a");
        let mut queue = UploadQueue::new(MemoryJobStore::new());
        let id = queue.enqueue(&record, 1).unwrap();

        let mut worker = UploadWorker::new(queue, Flaky::failing(u32::MAX), 2, 20);
        worker.drain().unwrap();
        let report = worker.drain().unwrap();
        assert_eq!(report.failed, 1);

        let job = worker.queue().get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("HTTP 503 unavailable"));
        assert!(record.front_path.exists());
        assert!(record.back_path.exists());
    }
}
