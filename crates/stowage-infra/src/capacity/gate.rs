use std::sync::Arc;

use stowage_core::{AdmissionConfig, AppError};

use super::metrics::{HostMetrics, SystemLoadSnapshot};

/// Rejects work while the host is saturated.
///
/// A request is turned away when the free-memory ratio is below
/// `memory_free_ratio_threshold`, or when the one-minute load average exceeds
/// `cpu_count * cpu_load_multiplier`. Every check takes a fresh sample; there
/// is no smoothing, queueing or retry.
#[derive(Clone)]
pub struct AdmissionGate {
    config: AdmissionConfig,
    metrics: Arc<dyn HostMetrics>,
}

impl AdmissionGate {
    pub fn new(config: AdmissionConfig, metrics: Arc<dyn HostMetrics>) -> Self {
        Self { config, metrics }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<dyn HostMetrics> {
        &self.metrics
    }

    /// Sample the host and decide. Returns the sample on admission.
    pub fn check_capacity(&self) -> Result<SystemLoadSnapshot, AppError> {
        let snapshot = self.metrics.snapshot();
        self.evaluate(&snapshot)?;
        Ok(snapshot)
    }

    pub fn evaluate(&self, snapshot: &SystemLoadSnapshot) -> Result<(), AppError> {
        let free_memory_ratio = snapshot.free_memory_ratio();
        let load_limit = snapshot.cpu_count as f64 * self.config.cpu_load_multiplier;

        let memory_low = free_memory_ratio < self.config.memory_free_ratio_threshold;
        let load_high = snapshot.load_average_one > load_limit;

        if memory_low || load_high {
            tracing::warn!(
                free_memory_ratio = free_memory_ratio,
                memory_threshold = self.config.memory_free_ratio_threshold,
                load_average = snapshot.load_average_one,
                load_limit = load_limit,
                memory_low,
                load_high,
                "Host saturated, rejecting upload"
            );
            return Err(AppError::HostOverloaded {
                free_memory_ratio,
                load_average: snapshot.load_average_one,
                load_limit,
            });
        }

        Ok(())
    }
}
