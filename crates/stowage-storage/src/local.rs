use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use stowage_core::ByteStream;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

use crate::keys::sanitize_file_name;
use crate::traits::{Storage, StorageError, StorageResult, StoredFile};

/// Local filesystem storage implementation
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at `base_path`, creating the directory
    /// if needed.
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        let base_path = base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;

        Ok(LocalStorage { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert storage key to filesystem path with security validation
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.is_empty()
            || storage_key == "."
            || storage_key == ".."
            || storage_key.contains('/')
            || storage_key.contains('\\')
        {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }

        let path = self.base_path.join(storage_key);
        if path.parent() != Some(self.base_path.as_path()) {
            return Err(StorageError::InvalidKey(
                "Storage key resolves outside storage directory".to_string(),
            ));
        }

        Ok(path)
    }

    /// Hidden sibling of the destination. Independent of the key so that a
    /// maximum-length key still yields a valid file name.
    fn staging_path(&self) -> PathBuf {
        self.base_path
            .join(format!(".{}.partial", Uuid::new_v4().simple()))
    }
}

/// A file being written next to its final destination. Unless committed, the
/// file is removed when the guard drops, including when the owning future is
/// cancelled mid-write.
struct StagingFile {
    path: PathBuf,
    armed: bool,
}

impl StagingFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically move the staged file over `destination`.
    async fn commit(mut self, destination: &Path) -> io::Result<()> {
        fs::rename(&self.path, destination).await?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Removed partial upload");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove partial upload"
                );
            }
        }
    }
}

fn write_failed(path: &Path, action: &str, err: io::Error) -> StorageError {
    StorageError::WriteFailed(format!("Failed to {} {}: {}", action, path.display(), err))
}

#[async_trait]
impl Storage for LocalStorage {
    async fn persist_stream(
        &self,
        name: &str,
        mut stream: ByteStream<'_>,
        max_bytes: Option<u64>,
    ) -> StorageResult<StoredFile> {
        let key = sanitize_file_name(name)?;
        let path = self.key_to_path(&key)?;
        let staging = StagingFile::new(self.staging_path());

        let start = Instant::now();

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(staging.path())
            .await
            .map_err(|e| write_failed(staging.path(), "create", e))?;
        let mut writer = BufWriter::new(file);
        let mut bytes_written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::SourceInterrupted(e.to_string()))?;

            bytes_written += chunk.len() as u64;
            if let Some(limit) = max_bytes {
                if bytes_written > limit {
                    tracing::debug!(
                        key = %key,
                        limit_bytes = limit,
                        "Upload stream exceeded size limit"
                    );
                    return Err(StorageError::SizeLimitExceeded { limit });
                }
            }

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| write_failed(staging.path(), "write", e))?;
        }

        writer
            .flush()
            .await
            .map_err(|e| write_failed(staging.path(), "flush", e))?;
        let file = writer.into_inner();
        file.sync_all()
            .await
            .map_err(|e| write_failed(staging.path(), "sync", e))?;
        drop(file);

        staging
            .commit(&path)
            .await
            .map_err(|e| write_failed(&path, "rename into", e))?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = bytes_written,
            duration_ms = start.elapsed().as_millis() as u64,
            "File persisted to local storage"
        );

        Ok(StoredFile {
            key,
            path,
            bytes_written,
        })
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn is_writable(&self) -> bool {
        let probe = self
            .base_path
            .join(format!(".write-probe.{}", Uuid::new_v4().simple()));

        match fs::write(&probe, b"").await {
            Ok(()) => {
                if let Err(e) = fs::remove_file(&probe).await {
                    tracing::warn!(path = %probe.display(), error = %e, "Failed to remove write probe");
                }
                true
            }
            Err(e) => {
                tracing::warn!(path = %self.base_path.display(), error = %e, "Storage root is not writable");
                false
            }
        }
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
