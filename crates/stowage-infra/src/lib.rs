//! Stowage Infrastructure Library
//!
//! This crate provides the load-protection and plumbing components used by the
//! upload service:
//! - Admission gate (host memory and load sampling)
//! - Upload concurrency limiter
//! - Circuit breaker for storage writes
//! - Source wait tracking for the breaker's timeout
//! - Middleware (request ID)
//! - Telemetry initialization

#[cfg(feature = "middleware")]
pub mod middleware;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(feature = "capacity")]
pub mod capacity;

pub mod circuit_breaker;
pub mod concurrency;
pub mod source_wait;

// Re-export commonly used types
#[cfg(feature = "middleware")]
pub use middleware::{get_request_id, request_id_middleware, RequestId, REQUEST_ID_HEADER};

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};

#[cfg(feature = "capacity")]
pub use capacity::{
    AdmissionGate, HostMetrics, StaticHostMetrics, SysinfoHostMetrics, SystemLoadSnapshot,
};

pub use circuit_breaker::{
    BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState, FailureClass,
};
pub use concurrency::{UploadLimiter, UploadSlot};
pub use source_wait::{SourceWait, WaitTracked};
