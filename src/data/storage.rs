//! Durable storage for committed keystrokes.
//!
//! The sink stage only ever sees the [`LogStorage`] trait: append-at-offset
//! commits plus a diagnostic read-back. [`FileLogStorage`] keeps the log in a
//! single file; an in-memory card lives in [`crate::hardware::mock`].
use crate::error::{AppResult, PipelineError};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Storage collaborator used by the sink stage.
///
/// # Contract
/// - `commit` writes `bytes` starting at `offset`. On `Err` nothing about the
///   stored range is guaranteed; some prefix may have landed.
/// - `read` returns up to `len` bytes starting at `offset`, fewer at end of log.
/// - `erase` removes any previous log so the next run starts at offset 0.
#[async_trait]
pub trait LogStorage: Send {
    /// Remove any previous log.
    async fn erase(&mut self) -> AppResult<()>;

    /// Write `bytes` at `offset`.
    async fn commit(&mut self, bytes: &[u8], offset: u64) -> AppResult<()>;

    /// Read back up to `len` bytes at `offset`.
    async fn read(&mut self, len: usize, offset: u64) -> AppResult<Vec<u8>>;
}

#[async_trait]
impl<T: LogStorage + ?Sized> LogStorage for Box<T> {
    async fn erase(&mut self) -> AppResult<()> {
        (**self).erase().await
    }

    async fn commit(&mut self, bytes: &[u8], offset: u64) -> AppResult<()> {
        (**self).commit(bytes, offset).await
    }

    async fn read(&mut self, len: usize, offset: u64) -> AppResult<Vec<u8>> {
        (**self).read(len, offset).await
    }
}

/// A log kept in a single file.
#[derive(Debug, Clone)]
pub struct FileLogStorage {
    path: PathBuf,
}

impl FileLogStorage {
    /// Storage writing to `path`. Nothing is touched until the first call.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LogStorage for FileLogStorage {
    async fn erase(&mut self) -> AppResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Removed previous log file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Storage(format!(
                "Failed to remove {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn commit(&mut self, bytes: &[u8], offset: u64) -> AppResult<()> {
        let storage_err =
            |e: std::io::Error| PipelineError::Storage(format!("{}: {e}", self.path.display()));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(storage_err)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .await
            .map_err(storage_err)?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(storage_err)?;
        file.write_all(bytes).await.map_err(storage_err)?;
        file.sync_data().await.map_err(storage_err)?;
        Ok(())
    }

    async fn read(&mut self, len: usize, offset: u64) -> AppResult<Vec<u8>> {
        let storage_err =
            |e: std::io::Error| PipelineError::Storage(format!("{}: {e}", self.path.display()));

        let mut file = fs::File::open(&self.path).await.map_err(storage_err)?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(storage_err)?;

        let mut buf = Vec::with_capacity(len);
        file.take(len as u64)
            .read_to_end(&mut buf)
            .await
            .map_err(storage_err)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_appends_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileLogStorage::new(dir.path().join("log.txt"));

        storage.commit(b"Uryyb", 0).await.unwrap();
        storage.commit(b", jbeyq", 5).await.unwrap();

        let contents = std::fs::read(storage.path()).unwrap();
        assert_eq!(contents, b"Uryyb, jbeyq");
        assert_eq!(storage.read(5, 0).await.unwrap(), b"Uryyb");
        assert_eq!(storage.read(100, 7).await.unwrap(), b"jbeyq");
    }

    #[tokio::test]
    async fn test_erase_removes_previous_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, b"stale").unwrap();

        let mut storage = FileLogStorage::new(&path);
        storage.erase().await.unwrap();
        assert!(!path.exists());

        // Erasing a log that does not exist is fine
        storage.erase().await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileLogStorage::new(dir.path().join("mmc0").join("log.txt"));

        storage.commit(b"abc", 0).await.unwrap();
        assert_eq!(storage.read(3, 0).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_read_missing_log_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileLogStorage::new(dir.path().join("absent.txt"));

        let err = storage.read(1, 0).await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }
}
