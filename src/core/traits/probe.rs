//! Accelerator probing.

use serde::Serialize;
use std::fmt::Debug;

/// Snapshot of accelerator availability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceReport {
    /// Whether at least one accelerator is usable.
    pub available: bool,
    /// Number of visible accelerators.
    pub device_count: usize,
    /// Name of the first device, empty when unknown.
    pub device_name: String,
    /// Total memory of the first device in bytes, 0 when unknown.
    pub device_memory_bytes: u64,
}

impl ResourceReport {
    /// A report for a host without accelerators.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Writes the report to the log.
    pub fn log(&self) {
        tracing::info!("Accelerator available: {}", self.available);
        if self.available {
            tracing::info!("Device count: {}", self.device_count);
            tracing::info!("Device name: {}", self.device_name);
            tracing::info!("Device memory: {}", self.device_memory_bytes);
        }
    }
}

/// Reports accelerator capacity. Probing is advisory and must never fail or block
/// the pipeline; implementations return [`ResourceReport::unavailable`] when unsure.
pub trait ResourceProbe: Send + Sync + Debug {
    /// Probes the host.
    fn probe(&self) -> ResourceReport;
}
