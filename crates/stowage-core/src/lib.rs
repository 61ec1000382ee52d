//! Stowage Core Library
//!
//! This crate provides the domain types shared by every Stowage component:
//! configuration, the unified error type, upload request/result models and
//! the upload validator.

pub mod config;
pub mod error;
pub mod models;
pub mod validation;

// Re-export commonly used types
pub use config::{
    AdmissionConfig, BaseConfig, BasicAuthCredentials, CircuitBreakerConfig, Config, LogFormat,
    UploadPolicy, UploadServiceConfig,
};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::{ByteStream, StoredUpload, UploadRequest, UploadResult};
pub use validation::{ValidationError, Validator};
