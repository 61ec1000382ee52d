//! Stowage Storage Library
//!
//! This crate provides the storage abstraction used by the upload pipeline and
//! its local filesystem implementation.
//!
//! # Storage key format
//!
//! Uploads are stored flat under the storage root, one file per upload, named
//! after the sanitized declared file name. Key sanitization is centralized in
//! the `keys` module.

pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod traits;

// Re-export commonly used types
pub use keys::sanitize_file_name;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use traits::{Storage, StorageError, StorageResult, StoredFile};
