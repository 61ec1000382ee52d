//! Application state shared by every handler.
//!
//! The concurrency counter and the circuit breaker live here for the life of
//! the process and are injected into the pipeline; nothing is global.

use std::sync::Arc;

use stowage_core::{Config, Validator};
use stowage_infra::{AdmissionGate, CircuitBreaker, HostMetrics, UploadLimiter};
use stowage_storage::Storage;

use crate::services::upload::UploadPipeline;

/// Name the storage breaker reports in logs.
pub const STORAGE_BREAKER_NAME: &str = "storage";

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: UploadPipeline,
    pub gate: AdmissionGate,
    pub limiter: UploadLimiter,
    pub breaker: Arc<CircuitBreaker>,
    pub storage: Arc<dyn Storage>,
}

impl AppState {
    /// Wire the upload components from configuration around the given storage
    /// backend and host metrics source.
    pub fn new(config: Config, storage: Arc<dyn Storage>, metrics: Arc<dyn HostMetrics>) -> Self {
        let gate = AdmissionGate::new(config.admission().clone(), metrics);
        let limiter = UploadLimiter::new(config.max_concurrent_uploads());
        let breaker = Arc::new(CircuitBreaker::new(
            STORAGE_BREAKER_NAME,
            config.circuit_breaker().clone(),
        ));
        let validator = Validator::new(config.upload_policy().clone());

        let pipeline = UploadPipeline::new(
            validator,
            limiter.clone(),
            gate.clone(),
            breaker.clone(),
            storage.clone(),
        );

        Self {
            config,
            pipeline,
            gate,
            limiter,
            breaker,
            storage,
        }
    }

    pub fn metrics(&self) -> &Arc<dyn HostMetrics> {
        self.gate.metrics()
    }
}
