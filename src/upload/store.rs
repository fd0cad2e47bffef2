//! Durable storage for upload jobs.

use super::{QueueError, SqliteJobStore, UploadJob};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Persistence backend of the upload queue.
pub trait JobStore {
    /// Stores `job` under a fresh id and returns the id.
    fn insert(&mut self, job: UploadJob) -> Result<u64, QueueError>;

    fn get(&self, id: u64) -> Result<Option<UploadJob>, QueueError>;

    /// Replaces the stored job with the same id.
    fn update(&mut self, job: &UploadJob) -> Result<(), QueueError>;

    /// All jobs in id order.
    fn all(&self) -> Result<Vec<UploadJob>, QueueError>;

    /// Deletes matching jobs and returns how many were removed.
    fn remove_where(&mut self, pred: &dyn Fn(&UploadJob) -> bool) -> Result<usize, QueueError>;
}

impl<S: JobStore + ?Sized> JobStore for Box<S> {
    fn insert(&mut self, job: UploadJob) -> Result<u64, QueueError> {
        (**self).insert(job)
    }

    fn get(&self, id: u64) -> Result<Option<UploadJob>, QueueError> {
        (**self).get(id)
    }

    fn update(&mut self, job: &UploadJob) -> Result<(), QueueError> {
        (**self).update(job)
    }

    fn all(&self) -> Result<Vec<UploadJob>, QueueError> {
        (**self).all()
    }

    fn remove_where(&mut self, pred: &dyn Fn(&UploadJob) -> bool) -> Result<usize, QueueError> {
        (**self).remove_where(pred)
    }
}

/// Opens the job store at `path`: a `.json` file keeps the JSON store,
/// anything else is an SQLite database.
pub fn open_job_store(path: &Path) -> Result<Box<dyn JobStore + Send>, QueueError> {
    if path.extension().is_some_and(|ext| ext == "json") {
        Ok(Box::new(JsonFileJobStore::open(path)?))
    } else {
        Ok(Box::new(SqliteJobStore::open(path)?))
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreState {
    next_id: u64,
    jobs: BTreeMap<u64, UploadJob>,
}

impl StoreState {
    fn insert(&mut self, mut job: UploadJob) -> u64 {
        self.next_id += 1;
        job.id = self.next_id;
        self.jobs.insert(job.id, job);
        self.next_id
    }

    fn update(&mut self, job: &UploadJob) -> Result<(), QueueError> {
        let slot = self.jobs.get_mut(&job.id).ok_or(QueueError::NotFound(job.id))?;
        *slot = job.clone();
        Ok(())
    }

    fn remove_where(&mut self, pred: &dyn Fn(&UploadJob) -> bool) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !pred(job));
        before - self.jobs.len()
    }
}

/// Volatile job store.
#[derive(Debug, Default, Clone)]
pub struct MemoryJobStore {
    state: StoreState,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&mut self, job: UploadJob) -> Result<u64, QueueError> {
        Ok(self.state.insert(job))
    }

    fn get(&self, id: u64) -> Result<Option<UploadJob>, QueueError> {
        Ok(self.state.jobs.get(&id).cloned())
    }

    fn update(&mut self, job: &UploadJob) -> Result<(), QueueError> {
        self.state.update(job)
    }

    fn all(&self) -> Result<Vec<UploadJob>, QueueError> {
        Ok(self.state.jobs.values().cloned().collect())
    }

    fn remove_where(&mut self, pred: &dyn Fn(&UploadJob) -> bool) -> Result<usize, QueueError> {
        Ok(self.state.remove_where(pred))
    }
}

/// Job store kept in a JSON file, rewritten after every change.
#[derive(Debug)]
pub struct JsonFileJobStore {
    path: PathBuf,
    state: StoreState,
}

impl JsonFileJobStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();
        let state = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), jobs = state.jobs.len(), "Opened upload queue");
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the whole state to a synced temp file and renames it over
    /// the queue file. A crash leaves the old or the new file, never a mix.
    fn persist(&self) -> Result<(), QueueError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;

        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&serde_json::to_vec_pretty(&self.state)?)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;
        sync_dir(parent)?;
        Ok(())
    }
}

/// Makes the rename itself durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

impl JobStore for JsonFileJobStore {
    fn insert(&mut self, job: UploadJob) -> Result<u64, QueueError> {
        let id = self.state.insert(job);
        self.persist()?;
        Ok(id)
    }

    fn get(&self, id: u64) -> Result<Option<UploadJob>, QueueError> {
        Ok(self.state.jobs.get(&id).cloned())
    }

    fn update(&mut self, job: &UploadJob) -> Result<(), QueueError> {
        self.state.update(job)?;
        self.persist()
    }

    fn all(&self) -> Result<Vec<UploadJob>, QueueError> {
        Ok(self.state.jobs.values().cloned().collect())
    }

    fn remove_where(&mut self, pred: &dyn Fn(&UploadJob) -> bool) -> Result<usize, QueueError> {
        let removed = self.state.remove_where(pred);
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }
}
