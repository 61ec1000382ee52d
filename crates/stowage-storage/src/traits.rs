//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use std::path::PathBuf;

use async_trait::async_trait;
use stowage_core::ByteStream;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// The byte source failed while it was being read (client went away).
    #[error("Upload source interrupted: {0}")]
    SourceInterrupted(String),

    #[error("Upload exceeds the {limit} byte limit")]
    SizeLimitExceeded { limit: u64 },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// Whether the error reflects a problem with the storage backend itself,
    /// as opposed to a bad or vanished client.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            StorageError::WriteFailed(_) | StorageError::IoError(_) | StorageError::ConfigError(_)
        )
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A completely written, durable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Sanitized name the file is stored under
    pub key: String,
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Storage abstraction trait
///
/// A backend either stores the complete stream under the returned key or leaves
/// nothing behind under that key.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stream `stream` into storage under the sanitized form of `name`.
    ///
    /// When `max_bytes` is set, reading more than that many bytes aborts the
    /// write with [`StorageError::SizeLimitExceeded`]. An existing file with the
    /// same key is replaced atomically.
    async fn persist_stream(
        &self,
        name: &str,
        stream: ByteStream<'_>,
        max_bytes: Option<u64>,
    ) -> StorageResult<StoredFile>;

    /// Check if a file exists under `key`
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Whether new files can currently be created in the backend
    async fn is_writable(&self) -> bool;

    /// Get the storage backend type
    fn backend_type(&self) -> &'static str;
}
