//! Host capacity sampling and load-based admission.

mod gate;
mod metrics;

pub use gate::AdmissionGate;
pub use metrics::{HostMetrics, StaticHostMetrics, SysinfoHostMetrics, SystemLoadSnapshot};
