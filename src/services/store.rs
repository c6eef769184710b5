//! Durable keyed storage of job outcomes.
//!
//! [`FileResultStore`] keeps every record in one JSON array on disk and
//! rewrites it through a temp file and rename on each upsert. Writers in
//! different processes serialize on an advisory lock held on `<path>.lock`.
//! The Postgres backend lives in [`crate::db::queries`].

use async_trait::async_trait;
use fs4::fs_std::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::job::JobRecord;

/// Keyed upsert/read of [`JobRecord`]s.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert the record, or replace the one with the same job id.
    async fn upsert(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Look up a record. `Ok(None)` means the job is unknown.
    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>, StoreError>;

    /// All records in store order.
    async fn list(&self) -> Result<Vec<JobRecord>, StoreError>;

    /// Check the backing medium is reachable and readable.
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// JSON-file backed result store. Safe to share one file between the API
/// server and standalone workers.
pub struct FileResultStore {
    path: PathBuf,
    // Keeps this process's writers from queueing up on the file lock.
    lock: Mutex<()>,
}

impl FileResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole collection. A missing file is an empty store; anything
    /// unparseable is reported as corruption.
    async fn load(&self) -> Result<Vec<JobRecord>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", self.path.display(), e)))
    }

    /// Block until this handle holds the exclusive lock on `<path>.lock`.
    /// The lock is released when the returned file is dropped.
    async fn lock_file(&self) -> Result<File, StoreError> {
        let lock_path = self.lock_path();
        blocking(move || {
            std::fs::create_dir_all(parent_dir(&lock_path))?;
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
    }

    async fn persist(&self, records: &[JobRecord]) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(records)?;
        let path = self.path.clone();
        blocking(move || write_atomically(&path, &payload)).await
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }
}

/// Write `payload` to a fresh temp file beside `path`, flush it to disk, then
/// rename it over `path`. Readers see the old or the new file, never a mix.
fn write_atomically(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut temp = tempfile::NamedTempFile::new_in(parent_dir(path))?;
    temp.write_all(payload)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
        .map_err(StoreError::Io)
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn upsert(&self, record: &JobRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let _file_lock = self.lock_file().await?;

        let mut records = self.load().await?;
        match records.iter_mut().find(|r| r.job_id == record.job_id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }

        self.persist(&records).await
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        let records = self.load().await?;
        Ok(records.into_iter().find(|r| r.job_id == job_id))
    }

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.list().await.map(|_| ())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Result store is corrupt: {0}")]
    Corrupt(String),

    #[error("Result store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize job records: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
