use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parsed form of a device placement string such as
/// `/job:worker/replica:0/task:0/device:GPU:1`. Every field is optional;
/// short forms like `/GPU:0` or `/device:CPU:*` parse as well.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceName {
    pub job: Option<String>,
    pub replica: Option<i32>,
    pub task: Option<i32>,
    pub device_type: Option<String>,
    /// Device ordinal; `None` when the name used the `*` wildcard.
    pub id: Option<i32>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceNameError {
    #[error("device name is empty")]
    Empty,
    #[error("unrecognized segment '{segment}' in device name '{name}'")]
    UnrecognizedSegment { name: String, segment: String },
    #[error("invalid numeric field '{value}' in device name '{name}'")]
    InvalidNumber { name: String, value: String },
}

impl DeviceName {
    pub fn parse(name: &str) -> Result<DeviceName, DeviceNameError> {
        if name.is_empty() {
            return Err(DeviceNameError::Empty);
        }
        let mut parsed = DeviceName::default();
        for segment in name.split('/').filter(|s| !s.is_empty()) {
            if let Some(job) = segment.strip_prefix("job:") {
                parsed.job = Some(job.to_string());
            } else if let Some(replica) = segment.strip_prefix("replica:") {
                parsed.replica = Some(parse_ordinal(name, replica)?);
            } else if let Some(task) = segment.strip_prefix("task:") {
                parsed.task = Some(parse_ordinal(name, task)?);
            } else if let Some(rest) = segment.strip_prefix("device:") {
                parse_type_and_id(name, rest, &mut parsed)?;
            } else if segment.contains(':') {
                parse_type_and_id(name, segment, &mut parsed)?;
            } else {
                return Err(DeviceNameError::UnrecognizedSegment {
                    name: name.to_string(),
                    segment: segment.to_string(),
                });
            }
        }
        Ok(parsed)
    }

    /// Whether the parsed type names a GPU (`GPU` or `gpu`).
    pub fn is_gpu(&self) -> bool {
        matches!(self.device_type.as_deref(), Some("GPU") | Some("gpu"))
    }
}

fn parse_type_and_id(
    name: &str,
    segment: &str,
    parsed: &mut DeviceName,
) -> Result<(), DeviceNameError> {
    let Some((device_type, id)) = segment.split_once(':') else {
        return Err(DeviceNameError::UnrecognizedSegment {
            name: name.to_string(),
            segment: segment.to_string(),
        });
    };
    parsed.device_type = Some(device_type.to_string());
    parsed.id = if id == "*" {
        None
    } else {
        Some(parse_ordinal(name, id)?)
    };
    Ok(())
}

fn parse_ordinal(name: &str, value: &str) -> Result<i32, DeviceNameError> {
    value
        .parse::<i32>()
        .map_err(|_| DeviceNameError::InvalidNumber {
            name: name.to_string(),
            value: value.to_string(),
        })
}

/// Static capabilities of one device, keyed by device name in the table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub device_type: String,
    pub memory_size: i64,
    #[serde(default)]
    pub frequency: i64,
    #[serde(default)]
    pub num_cores: i64,
}

impl DeviceProperties {
    pub fn gpu(memory_size: i64) -> Self {
        DeviceProperties {
            device_type: "GPU".to_string(),
            memory_size,
            ..DeviceProperties::default()
        }
    }

    pub fn cpu(memory_size: i64) -> Self {
        DeviceProperties {
            device_type: "CPU".to_string(),
            memory_size,
            ..DeviceProperties::default()
        }
    }
}

/// Device table keyed by device name. The ordered map doubles as the stable
/// device enumeration the partitioner depends on.
pub type DeviceTable = BTreeMap<String, DeviceProperties>;

/// Read-only view of the devices available to the optimizer.
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    devices: DeviceTable,
}

impl Cluster {
    pub fn new(devices: DeviceTable) -> Self {
        Cluster { devices }
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }
}
