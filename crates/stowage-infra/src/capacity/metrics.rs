use std::sync::{Mutex, MutexGuard, PoisonError};

use sysinfo::System;

/// Host readings taken at one instant. Never cached between checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemLoadSnapshot {
    pub free_memory_bytes: u64,
    pub total_memory_bytes: u64,
    pub load_average_one: f64,
    pub cpu_count: usize,
}

impl SystemLoadSnapshot {
    /// Fraction of memory that is free. An unknown total reads as fully free.
    pub fn free_memory_ratio(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 1.0;
        }
        self.free_memory_bytes as f64 / self.total_memory_bytes as f64
    }
}

/// Source of host readings for the admission gate and health endpoint.
pub trait HostMetrics: Send + Sync {
    fn snapshot(&self) -> SystemLoadSnapshot;

    /// Global CPU usage in percent since the previous call.
    fn cpu_usage_percent(&self) -> f32;
}

/// Readings from the operating system via sysinfo.
pub struct SysinfoHostMetrics {
    system: Mutex<System>,
    cpu_count: usize,
}

impl SysinfoHostMetrics {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let cpu_count = match system.cpus().len() {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        };

        tracing::debug!(
            cpu_count,
            total_memory_bytes = system.total_memory(),
            "Host metrics initialized"
        );

        Self {
            system: Mutex::new(system),
            cpu_count,
        }
    }

    fn system(&self) -> MutexGuard<'_, System> {
        // Readings are refreshed before every use, so a poisoned value is harmless.
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SysinfoHostMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMetrics for SysinfoHostMetrics {
    fn snapshot(&self) -> SystemLoadSnapshot {
        let mut system = self.system();
        system.refresh_memory();

        SystemLoadSnapshot {
            free_memory_bytes: system.available_memory(),
            total_memory_bytes: system.total_memory(),
            load_average_one: System::load_average().one,
            cpu_count: self.cpu_count,
        }
    }

    fn cpu_usage_percent(&self) -> f32 {
        let mut system = self.system();
        system.refresh_cpu();
        system.global_cpu_info().cpu_usage()
    }
}

/// Fixed readings that can be swapped at runtime. Useful where the host's own
/// numbers should not drive admission, such as tests and load simulations.
pub struct StaticHostMetrics {
    snapshot: Mutex<SystemLoadSnapshot>,
    cpu_usage_percent: f32,
}

impl StaticHostMetrics {
    pub fn new(snapshot: SystemLoadSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            cpu_usage_percent: 0.0,
        }
    }

    /// A host with plenty of free memory and no load.
    pub fn idle() -> Self {
        Self::new(SystemLoadSnapshot {
            free_memory_bytes: 8 * 1024 * 1024 * 1024,
            total_memory_bytes: 16 * 1024 * 1024 * 1024,
            load_average_one: 0.0,
            cpu_count: 4,
        })
    }

    pub fn set(&self, snapshot: SystemLoadSnapshot) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

impl HostMetrics for StaticHostMetrics {
    fn snapshot(&self) -> SystemLoadSnapshot {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cpu_usage_percent(&self) -> f32 {
        self.cpu_usage_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_memory_ratio() {
        let snapshot = SystemLoadSnapshot {
            free_memory_bytes: 1,
            total_memory_bytes: 4,
            load_average_one: 0.0,
            cpu_count: 1,
        };
        assert_eq!(snapshot.free_memory_ratio(), 0.25);
    }

    #[test]
    fn test_unknown_total_memory_reads_as_free() {
        let snapshot = SystemLoadSnapshot {
            free_memory_bytes: 0,
            total_memory_bytes: 0,
            load_average_one: 0.0,
            cpu_count: 1,
        };
        assert_eq!(snapshot.free_memory_ratio(), 1.0);
    }

    #[test]
    fn test_sysinfo_snapshot_is_sane() {
        let metrics = SysinfoHostMetrics::new();
        let snapshot = metrics.snapshot();
        assert!(snapshot.cpu_count >= 1);
        assert!(snapshot.free_memory_bytes <= snapshot.total_memory_bytes);
        assert!(snapshot.load_average_one >= 0.0);
    }

    #[test]
    fn test_static_metrics_can_be_swapped() {
        let metrics = StaticHostMetrics::idle();
        let mut busy = metrics.snapshot();
        busy.load_average_one = 42.0;
        metrics.set(busy);
        assert_eq!(metrics.snapshot().load_average_one, 42.0);
    }
}
