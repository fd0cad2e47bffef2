//! On-disk staging area for captured photos and their metadata.

use super::id::image_file_name;
use super::DatasetError;
use std::fs;
use std::path::{Path, PathBuf};

const STAGING_DIR: &str = "staging";
const IMAGES_DIR: &str = "images";
const META_DIR: &str = "meta";

/// `<root>/staging/{images,meta}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPaths {
    root: PathBuf,
}

impl StagingPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.staging_root().join(IMAGES_DIR)
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.staging_root().join(META_DIR)
    }

    /// Creates the staging directories if missing.
    pub fn ensure_dirs(&self) -> Result<(), DatasetError> {
        for dir in [self.images_dir(), self.meta_dir()] {
            fs::create_dir_all(&dir).map_err(|source| DatasetError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Path for a new photo of `side` belonging to `base_id`.
    pub fn image_file(&self, base_id: &str, side: &str) -> Result<PathBuf, DatasetError> {
        self.ensure_dirs()?;
        Ok(self.images_dir().join(image_file_name(base_id, side, "jpg")))
    }

    /// Path for a metadata JSON file named after `base_name`.
    pub fn meta_file(&self, base_name: &str) -> Result<PathBuf, DatasetError> {
        self.ensure_dirs()?;
        Ok(self.meta_dir().join(format!("{base_name}.json")))
    }

    /// Removes a staged file, ignoring files that are already gone.
    pub fn discard(path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Discarded staged file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to discard staged file"),
        }
    }
}
