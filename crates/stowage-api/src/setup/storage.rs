//! Storage setup and initialization

use std::sync::Arc;

use anyhow::{Context, Result};
use stowage_core::Config;
use stowage_storage::{LocalStorage, Storage};

pub async fn setup_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    tracing::info!(root = %config.storage_root().display(), "Initializing storage...");

    let storage = LocalStorage::new(config.storage_root().clone())
        .await
        .context("Failed to initialize upload storage")?;

    if !storage.is_writable().await {
        tracing::warn!(
            root = %storage.base_path().display(),
            "Upload directory is not writable; uploads will fail until it is"
        );
    }

    tracing::info!(
        backend = storage.backend_type(),
        root = %storage.base_path().display(),
        "Storage initialized successfully"
    );

    Ok(Arc::new(storage))
}
