//! Application setup and initialization
//!
//! Everything `main` needs to turn a [`Config`] into a running router lives
//! here, so integration tests can build the same application.

pub mod routes;
pub mod server;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use stowage_core::Config;
use stowage_infra::{HostMetrics, SysinfoHostMetrics};

use crate::state::AppState;

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    // Fail fast on misconfiguration
    config
        .validate()
        .context("Configuration validation failed")?;

    stowage_infra::init_telemetry(config.log_format())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!(
        environment = config.environment(),
        production = config.is_production(),
        port = config.server_port(),
        max_concurrent_uploads = config.max_concurrent_uploads(),
        max_file_size_bytes = config.max_file_size_bytes(),
        "Configuration loaded and validated successfully"
    );

    let storage = storage::setup_storage(&config).await?;
    let metrics: Arc<dyn HostMetrics> = Arc::new(SysinfoHostMetrics::new());

    let state = Arc::new(AppState::new(config, storage, metrics));
    let router = routes::setup_routes(state.clone());

    Ok((state, router))
}
