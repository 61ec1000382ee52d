//! Error types module
//!
//! All failures that can end an upload are unified under [`AppError`]. Component
//! errors (validation, storage, circuit breaker) are converted into it at the
//! pipeline boundary so the HTTP layer only ever deals with one type.

use crate::validation::ValidationError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for load shedding and other recoverable conditions
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "HOST_OVERLOADED")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid file name: {0}")]
    InvalidFilename(String),

    #[error("Max concurrent uploads reached ({capacity} in flight)")]
    ConcurrencyLimitReached { capacity: usize },

    #[error("Host overloaded: free memory ratio {free_memory_ratio:.3}, load average {load_average:.2} (limit {load_limit:.2})")]
    HostOverloaded {
        free_memory_ratio: f64,
        load_average: f64,
        load_limit: f64,
    },

    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Storage write timed out after {timeout_ms}ms")]
    StorageTimeout { timeout_ms: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Upload interrupted: {0}")]
    UploadInterrupted(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Validation(_) => (
            400,
            "VALIDATION_FAILED",
            false,
            Some("Check the file against the upload policy and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::InvalidFilename(_) => (
            400,
            "INVALID_FILENAME",
            false,
            Some("Rename the file and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::ConcurrencyLimitReached { .. } => (
            429,
            "CONCURRENCY_LIMIT_REACHED",
            true,
            Some("Retry after a short delay"),
            false,
            LogLevel::Warn,
        ),
        AppError::HostOverloaded { .. } => (
            429,
            "HOST_OVERLOADED",
            true,
            Some("Wait 30-60 seconds and retry"),
            false,
            LogLevel::Warn,
        ),
        AppError::CircuitOpen => (
            503,
            "CIRCUIT_OPEN",
            true,
            Some("Wait 30 seconds and retry"),
            false,
            LogLevel::Warn,
        ),
        AppError::StorageTimeout { .. } => (
            500,
            "STORAGE_TIMEOUT",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Storage(_) => (
            500,
            "STORAGE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::UploadInterrupted(_) => (
            400,
            "UPLOAD_INTERRUPTED",
            true,
            Some("Check the connection and upload the file again"),
            false,
            LogLevel::Debug,
        ),
        AppError::Unauthorized(_) => (
            401,
            "UNAUTHORIZED",
            false,
            Some("Check the upload credentials"),
            false,
            LogLevel::Debug,
        ),
        AppError::RateLimited { .. } => (
            429,
            "RATE_LIMITED",
            true,
            Some("Wait for the Retry-After period and retry"),
            false,
            LogLevel::Debug,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Validation(_) => "Validation",
            AppError::InvalidFilename(_) => "InvalidFilename",
            AppError::ConcurrencyLimitReached { .. } => "ConcurrencyLimitReached",
            AppError::HostOverloaded { .. } => "HostOverloaded",
            AppError::CircuitOpen => "CircuitOpen",
            AppError::StorageTimeout { .. } => "StorageTimeout",
            AppError::Storage(_) => "Storage",
            AppError::UploadInterrupted(_) => "UploadInterrupted",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::RateLimited { .. } => "RateLimited",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// True when the request was turned away before any bytes were committed
    /// (policy, capacity, circuit). Everything else is a failure of work that
    /// had already started.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::InvalidFilename(_)
                | AppError::ConcurrencyLimitReached { .. }
                | AppError::HostOverloaded { .. }
                | AppError::CircuitOpen
                | AppError::Unauthorized(_)
                | AppError::RateLimited { .. }
        )
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Validation(err) => err.to_string(),
            AppError::InvalidFilename(_) => "File with a valid name is required.".to_string(),
            AppError::ConcurrencyLimitReached { .. } => {
                "Max concurrent uploads reached".to_string()
            }
            AppError::HostOverloaded { .. } => {
                "System under high load. Try again later.".to_string()
            }
            AppError::CircuitOpen => {
                "Upload storage is temporarily unavailable. Try again later.".to_string()
            }
            AppError::StorageTimeout { .. } | AppError::Storage(_) => {
                "Failed to write file stream.".to_string()
            }
            AppError::UploadInterrupted(_) => {
                "Upload was interrupted before completion.".to_string()
            }
            AppError::Unauthorized(ref msg) => msg.clone(),
            AppError::RateLimited { .. } => {
                "Too many requests. Please try again shortly.".to_string()
            }
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}
