//! Upload queue state transitions over a [`JobStore`].

use super::{JobStatus, JobStore, QueueError, UploadJob};
use crate::dataset::CardRecord;

/// Upload queue.
///
/// Jobs move `PENDING → UPLOADING → {UPLOADED | PENDING | FAILED}`.
#[derive(Debug)]
pub struct UploadQueue<S> {
    store: S,
}

impl<S: JobStore> UploadQueue<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Queues a labeled card and returns the job id.
    pub fn enqueue(&mut self, record: &CardRecord, now_ms: i64) -> Result<u64, QueueError> {
        let id = self.store.insert(UploadJob::from_record(record, now_ms))?;
        tracing::info!(job = id, base_id = %record.base_id, grade = %record.final_grade, "Queued upload");
        Ok(id)
    }

    pub fn get(&self, id: u64) -> Result<Option<UploadJob>, QueueError> {
        self.store.get(id)
    }

    /// Up to `limit` pending jobs, oldest first.
    pub fn next_pending(&self, limit: usize) -> Result<Vec<UploadJob>, QueueError> {
        let mut pending: Vec<UploadJob> = self
            .store
            .all()?
            .into_iter()
            .filter(|j| j.status == JobStatus::Pending)
            .collect();
        pending.sort_by_key(|j| (j.created_at_ms, j.id));
        pending.truncate(limit);
        Ok(pending)
    }

    pub fn mark_uploading(&mut self, id: u64) -> Result<(), QueueError> {
        self.set_status(id, JobStatus::Uploading)
    }

    pub fn mark_uploaded(&mut self, id: u64) -> Result<(), QueueError> {
        self.set_status(id, JobStatus::Uploaded)
    }

    /// Records a failed attempt. The job returns to `PENDING` while its
    /// retry count stays below `max_retries`, otherwise it is `FAILED`.
    pub fn retry_or_fail(
        &mut self,
        id: u64,
        error: &str,
        max_retries: u32,
    ) -> Result<JobStatus, QueueError> {
        let mut job = self.store.get(id)?.ok_or(QueueError::NotFound(id))?;
        job.retries += 1;
        job.status = if job.retries < max_retries {
            JobStatus::Pending
        } else {
            JobStatus::Failed
        };
        job.last_error = Some(error.to_string());
        self.store.update(&job)?;

        if job.status == JobStatus::Failed {
            tracing::warn!(job = id, retries = job.retries, error, "Upload failed permanently");
        } else {
            tracing::warn!(job = id, retries = job.retries, error, "Upload failed, will retry");
        }
        Ok(job.status)
    }

    pub fn count_by_status(&self, status: JobStatus) -> Result<usize, QueueError> {
        Ok(self.store.all()?.iter().filter(|j| j.status == status).count())
    }

    /// Returns jobs left `UPLOADING` by an interrupted drain to `PENDING`.
    pub fn recover_interrupted(&mut self) -> Result<usize, QueueError> {
        let stuck: Vec<UploadJob> = self
            .store
            .all()?
            .into_iter()
            .filter(|j| j.status == JobStatus::Uploading)
            .collect();
        for mut job in stuck.iter().cloned() {
            job.status = JobStatus::Pending;
            self.store.update(&job)?;
        }
        if !stuck.is_empty() {
            tracing::info!(count = stuck.len(), "Recovered interrupted uploads");
        }
        Ok(stuck.len())
    }

    /// Drops `UPLOADED` jobs created before `before_ms`.
    pub fn prune_uploaded(&mut self, before_ms: i64) -> Result<usize, QueueError> {
        self.store
            .remove_where(&|j| j.status == JobStatus::Uploaded && j.created_at_ms < before_ms)
    }

    fn set_status(&mut self, id: u64, status: JobStatus) -> Result<(), QueueError> {
        let mut job = self.store.get(id)?.ok_or(QueueError::NotFound(id))?;
        job.status = status;
        self.store.update(&job)?;
        tracing::debug!(job = id, status = %status, "Upload job status changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Grade;
    use crate::upload::{JsonFileJobStore, MemoryJobStore};

    fn record(base: &str) -> CardRecord {
        CardRecord {
            base_id: base.into(),
            device: "dev".into(),
            front_path: format!("/tmp/{base}_front.jpg").into(),
            back_path: format!("/tmp/{base}_back.jpg").into(),
            front_grade: Grade::NearMint,
            back_grade: Grade::ModeratelyPlayed,
            final_grade: Grade::ModeratelyPlayed,
            created_at_ms: 0,
        }
    }

    #[test]
    fn test_next_pending_oldest_first() {
        let mut queue = UploadQueue::new(MemoryJobStore::new());
        let late = queue.enqueue(&record("b"), 200).unwrap();
        let early = queue.enqueue(&record("a"), 100).unwrap();
        let third = queue.enqueue(&record("c"), 300).unwrap();
        queue.mark_uploading(third).unwrap();

        let ids: Vec<u64> = queue.next_pending(10).unwrap().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![early, late]);
        assert_eq!(queue.next_pending(1).unwrap().len(), 1);
    }

    #[test]
    fn test_retry_then_fail() {
        let mut queue = UploadQueue::new(MemoryJobStore::new());
        let id = queue.enqueue(&record("a"), 1).unwrap();

        for attempt in 1..5 {
            queue.mark_uploading(id).unwrap();
            assert_eq!(queue.retry_or_fail(id, "HTTP 503 busy", 5).unwrap(), JobStatus::Pending);
            assert_eq!(queue.get(id).unwrap().unwrap().retries, attempt);
        }
        assert_eq!(queue.retry_or_fail(id, "HTTP 500 boom", 5).unwrap(), JobStatus::Failed);

        let job = queue.get(id).unwrap().unwrap();
        assert_eq!(job.retries, 5);
        assert_eq!(job.last_error.as_deref(), Some("HTTP 500 boom"));
        assert!(queue.next_pending(10).unwrap().is_empty());
        assert_eq!(queue.count_by_status(JobStatus::Failed).unwrap(), 1);
    }

    #[test]
    fn test_unknown_job() {
        let mut queue = UploadQueue::new(MemoryJobStore::new());
        assert!(matches!(queue.mark_uploaded(9), Err(QueueError::NotFound(9))));
    }

    #[test]
    fn test_recover_and_prune() {
        let mut queue = UploadQueue::new(MemoryJobStore::new());
        let a = queue.enqueue(&record("a"), 10).unwrap();
        let b = queue.enqueue(&record("b"), 20).unwrap();
        queue.mark_uploading(a).unwrap();
        queue.mark_uploaded(b).unwrap();

        assert_eq!(queue.recover_interrupted().unwrap(), 1);
        assert_eq!(queue.get(a).unwrap().unwrap().status, JobStatus::Pending);

        assert_eq!(queue.prune_uploaded(15).unwrap(), 0);
        assert_eq!(queue.prune_uploaded(25).unwrap(), 1);
        assert!(queue.get(b).unwrap().is_none());
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue").join("jobs.json");

        let id = {
            let mut queue = UploadQueue::new(JsonFileJobStore::open(&path).unwrap());
            let id = queue.enqueue(&record("a"), 5).unwrap();
            queue.retry_or_fail(id, "offline", 5).unwrap();
            id
        };

        let mut queue = UploadQueue::new(JsonFileJobStore::open(&path).unwrap());
        let job = queue.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retries, 1);
        assert_eq!(job.back_grade, Grade::ModeratelyPlayed);

        let next = queue.enqueue(&record("b"), 6).unwrap();
        assert!(next > id);
    }

    #[test]
    fn test_json_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(JsonFileJobStore::open(&path), Err(QueueError::Json(_))));
    }
}
