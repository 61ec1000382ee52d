//! Test helpers: build an isolated AppState and router for integration tests.
//!
//! Run with: `cargo test -p stowage-api`

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum_test::multipart::Part;
use axum_test::TestServer;
use stowage_api::setup::routes;
use stowage_api::AppState;
use stowage_core::{Config, UploadServiceConfig};
use stowage_infra::{StaticHostMetrics, SystemLoadSnapshot};
use stowage_storage::{LocalStorage, Storage};
use tempfile::TempDir;

pub const MB: usize = 1024 * 1024;

/// Test application: server, shared state and owned resources.
pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub metrics: Arc<StaticHostMetrics>,
    pub temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    pub fn upload_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Names of everything in the upload directory, partial files included.
    pub fn stored_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.upload_dir())
            .expect("Failed to read upload dir")
            .map(|entry| {
                entry
                    .expect("Failed to read dir entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        names
    }

    /// Make the host look saturated on memory.
    pub fn saturate_memory(&self) {
        self.metrics.set(SystemLoadSnapshot {
            free_memory_bytes: 50 * MB as u64,
            total_memory_bytes: 1000 * MB as u64,
            load_average_one: 0.1,
            cpu_count: 4,
        });
    }
}

/// Config for tests: 1MB limit, CSV only, throttling off unless overridden.
pub fn create_test_config(upload_dir: &Path, overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("UPLOAD_DIR".to_string(), upload_dir.display().to_string()),
        ("MAX_FILE_SIZE".to_string(), MB.to_string()),
        ("ALLOWED_MIMETYPE".to_string(), "text/csv".to_string()),
        ("ALLOWED_EXTENSION".to_string(), ".csv".to_string()),
        ("MAX_CONCURRENT".to_string(), "2".to_string()),
        ("HTTP_RATE_LIMIT_PER_WINDOW".to_string(), "0".to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert(key.to_string(), value.to_string());
    }

    let config = UploadServiceConfig::from_vars(|key| vars.get(key).cloned())
        .expect("Failed to build test config");
    let config = Config(Box::new(config));
    config.validate().expect("Invalid test config");
    config
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(&[]).await
}

/// Setup a test app with isolated local storage and fixed host readings.
pub async fn setup_test_app_with(overrides: &[(&str, &str)]) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config = create_test_config(temp_dir.path(), overrides);

    let storage: Arc<dyn Storage> = Arc::new(
        LocalStorage::new(temp_dir.path())
            .await
            .expect("Failed to create local storage"),
    );
    let metrics = Arc::new(StaticHostMetrics::idle());

    let state = Arc::new(AppState::new(config, storage, metrics.clone()));
    let app = routes::setup_routes(state.clone());
    let server = TestServer::new(app.into_make_service()).expect("Failed to create test server");

    TestApp {
        server,
        state,
        metrics,
        temp_dir,
    }
}

pub fn csv_part(file_name: &str, contents: impl Into<bytes::Bytes>) -> Part {
    Part::bytes(contents.into())
        .file_name(file_name.to_string())
        .mime_type("text/csv")
}
