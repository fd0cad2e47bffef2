//! Capture identifiers and image file names.
//!
//! One base id is shared by the front and back photos of a card:
//! `yyyyMMdd_HHmmss_SSS_<device>_<seq6>`.

use super::DatasetError;
use chrono::{DateTime, Local, TimeZone};
use std::fs;
use std::path::{Path, PathBuf};

const SEQ_MODULUS: u32 = 1_000_000;
const MAX_DEVICE_TAG: usize = 32;

/// `(value + 1) mod 1_000_000` for any stored value.
fn next_sequence(value: u32) -> u32 {
    (value % SEQ_MODULUS + 1) % SEQ_MODULUS
}

/// Monotonic counter persisted across sessions.
pub trait SequenceCounter {
    /// Advances the counter and returns the new value.
    fn advance(&mut self) -> Result<u32, DatasetError>;
}

/// In-memory counter, for tests and one-shot tools.
#[derive(Debug, Default, Clone)]
pub struct MemoryCounter {
    value: u32,
}

impl MemoryCounter {
    pub fn starting_at(value: u32) -> Self {
        Self { value }
    }
}

impl SequenceCounter for MemoryCounter {
    fn advance(&mut self) -> Result<u32, DatasetError> {
        self.value = next_sequence(self.value);
        Ok(self.value)
    }
}

/// Counter stored as decimal text in a file.
#[derive(Debug, Clone)]
pub struct FileCounter {
    path: PathBuf,
}

impl FileCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn current(&self) -> Result<u32, DatasetError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => text
                .trim()
                .parse()
                .map_err(|_| DatasetError::CounterCorrupt(self.path.display().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl SequenceCounter for FileCounter {
    fn advance(&mut self) -> Result<u32, DatasetError> {
        let next = next_sequence(self.current()?);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, next.to_string())?;
        Ok(next)
    }
}

/// Keeps `[A-Za-z0-9_-]`, turns other runs into `_`, trims `_` and
/// caps the length. Falls back to `device`.
pub fn sanitize_device_tag(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "device".to_string()
    } else {
        trimmed.chars().take(MAX_DEVICE_TAG).collect()
    }
}

/// Canonical side name: `front`/`frente` → `front`, `back`/`verso` → `back`.
pub fn normalize_side(side: &str) -> String {
    let s = side.trim().to_lowercase();
    match s.as_str() {
        "front" | "frente" => "front".into(),
        "back" | "verso" => "back".into(),
        "" => "front".into(),
        _ => s,
    }
}

/// `<base>_<side>.<ext>`
pub fn image_file_name(base_id: &str, side: &str, ext: &str) -> String {
    format!("{base_id}_{}.{ext}", normalize_side(side))
}

/// Generates base ids from a clock time, a device tag and a counter.
#[derive(Debug)]
pub struct CaptureIdGenerator<C> {
    device: String,
    counter: C,
}

impl<C: SequenceCounter> CaptureIdGenerator<C> {
    pub fn new(device: &str, counter: C) -> Self {
        Self {
            device: sanitize_device_tag(device),
            counter,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Base id stamped with the current local time.
    pub fn next_base_id(&mut self) -> Result<String, DatasetError> {
        self.next_base_id_at(&Local::now())
    }

    /// Base id stamped with `at`.
    pub fn next_base_id_at<Tz: TimeZone>(&mut self, at: &DateTime<Tz>) -> Result<String, DatasetError>
    where
        Tz::Offset: std::fmt::Display,
    {
        let seq = self.counter.advance()?;
        Ok(format!(
            "{}_{}_{:06}",
            at.format("%Y%m%d_%H%M%S_%3f"),
            self.device,
            seq
        ))
    }
}

/// Base id of an image file name produced by [`image_file_name`].
pub fn base_id_of(path: &Path) -> Option<&str> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_suffix("_front")
        .or_else(|| stem.strip_suffix("_back"))
}
