//! Stowage API Library
//!
//! This crate provides the HTTP surface of the upload service: the upload
//! pipeline, handlers, middleware and application setup.

mod api_doc;
mod handlers;

pub mod auth;
pub mod error;
pub mod middleware;
pub mod services;
pub mod setup;
pub mod state;

// Re-exports
pub use error::{ErrorDetailPolicy, ErrorResponse, HttpAppError};
pub use handlers::health::HealthResponse;
pub use handlers::upload::{UploadResponse, FILE_FIELD};
pub use services::upload::UploadPipeline;
pub use state::AppState;
