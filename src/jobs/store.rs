//! # Job Store
//!
//! Keyed storage for job records, shared between a job's own task (the only
//! writer for that key) and the status endpoint (any number of readers).
//!
//! ## Contract:
//! - `create(id, state)` stores the initial record
//! - `write(id, state)` replaces the whole record (no merging)
//! - `read(id)` returns the record, `None` when there is none, or an error
//!   when a record exists but cannot be read
//!
//! Readers must never observe a half-written record. The memory backend gets
//! this from swapping whole values under a write lock; the file backend writes
//! a sibling temporary file and renames it over the record.
//!
//! Records are never deleted here. The memory backend lives as long as the
//! process; the file backend lives as long as the temp directory it writes to.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::config::AppConfig;
use crate::jobs::model::{JobId, JobState};

#[derive(Debug)]
pub enum StoreError {
    /// The backing medium failed (permissions, disk full, ...)
    Io(io::Error),

    /// A record exists but does not parse as a job state
    Corrupt(String),

    /// A writer panicked while holding the in-memory lock
    Poisoned,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "job store I/O error: {}", err),
            StoreError::Corrupt(msg) => write!(f, "corrupt job record: {}", msg),
            StoreError::Poisoned => write!(f, "job store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err)
    }
}

pub trait JobStore: Send + Sync {
    fn create(&self, id: &JobId, state: &JobState) -> Result<(), StoreError>;

    fn write(&self, id: &JobId, state: &JobState) -> Result<(), StoreError>;

    fn read(&self, id: &JobId) -> Result<Option<JobState>, StoreError>;

    /// Short backend name for logs and the health endpoint.
    fn backend(&self) -> &'static str;
}

/// Build the backend selected by `jobs.store`.
pub fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    match config.jobs.store.as_str() {
        "memory" => Ok(Arc::new(MemoryJobStore::new())),
        "file" => {
            let store = FileJobStore::new(config.jobs_dir())?;
            tracing::info!("Job records under {}", store.dir().display());
            Ok(Arc::new(store))
        }
        other => Err(anyhow::anyhow!("Unknown job store backend: {}", other)),
    }
}

/// Process-local store: a map guarded by a reader-writer lock.
///
/// Enough whenever the status endpoint and the job tasks share one process,
/// which is always the case for this server.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<JobId, JobState>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, id: &JobId, state: &JobState) -> Result<(), StoreError> {
        self.write(id, state)
    }

    fn write(&self, id: &JobId, state: &JobState) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        records.insert(id.clone(), state.clone());
        Ok(())
    }

    fn read(&self, id: &JobId) -> Result<Option<JobState>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(id).cloned())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// One JSON file per job, `<jobs_dir>/<id>.json`.
///
/// Useful when the records should be inspectable from outside the process
/// or survive a restart for as long as the temp directory does.
#[derive(Debug)]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }
}

impl JobStore for FileJobStore {
    fn create(&self, id: &JobId, state: &JobState) -> Result<(), StoreError> {
        self.write(id, state)
    }

    fn write(&self, id: &JobId, state: &JobState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(state).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        // Write beside the record, then rename over it (atomic on POSIX)
        let mut staged = tempfile::Builder::new()
            .prefix(&format!(".{}", id.as_str()))
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        staged.write_all(&bytes)?;
        staged.flush()?;
        staged
            .persist(self.record_path(id))
            .map_err(|e| StoreError::Io(e.error))?;

        Ok(())
    }

    fn read(&self, id: &JobId) -> Result<Option<JobState>, StoreError> {
        let raw = match fs::read_to_string(self.record_path(id)) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err)),
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}
