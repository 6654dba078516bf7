//! Advisory memory-pressure gate.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::device::DeviceTable;

/// Peak memory consumption inferred for one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub used_memory: i64,
}

#[derive(Debug, Error)]
#[error("memory estimation failed: {reason}")]
pub struct MemoryEstimateError {
    pub reason: String,
}

impl MemoryEstimateError {
    pub fn new(reason: impl Into<String>) -> Self {
        MemoryEstimateError {
            reason: reason.into(),
        }
    }
}

/// Static estimator seam. Implementations predict per-device peak memory
/// without executing the graph.
pub trait MemoryEstimator {
    fn infer_statically(
        &self,
        devices: &DeviceTable,
    ) -> Result<BTreeMap<String, MemoryUsage>, MemoryEstimateError>;
}

/// True when any GPU with a known capacity is predicted to run at or over
/// that capacity. Devices without an estimate count as unpressured.
pub fn need_swap(devices: &DeviceTable, peak_usage: &BTreeMap<String, MemoryUsage>) -> bool {
    devices.iter().any(|(name, properties)| {
        properties.device_type == "GPU"
            && properties.memory_size > 0
            && peak_usage
                .get(name)
                .is_some_and(|usage| properties.memory_size <= usage.used_memory)
    })
}
