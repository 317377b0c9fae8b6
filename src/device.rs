//! Compute device selection
//!
//! `cpu` and `-1` select the CPU. Accelerators are named by `-`-separated
//! ids (`0`, `0-1-2`); this build has no accelerator backend, so any id is a
//! resource error.

use crate::error::{Error, ResourceError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

/// Resolve a device string to an available device
pub fn select_device(value: &str) -> Result<Device> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("cpu") || value == "-1" {
        return Ok(Device::Cpu);
    }
    let ids: Vec<&str> = value.split('-').collect();
    if ids.is_empty() || ids.iter().any(|id| id.parse::<u32>().is_err()) {
        return Err(Error::ConfigError(format!(
            "Invalid device '{value}' (expected cpu, -1 or accelerator ids such as 0-1)"
        )));
    }
    Err(ResourceError::DeviceUnavailable {
        id: ids[0].to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_aliases() {
        assert_eq!(select_device("cpu").unwrap(), Device::Cpu);
        assert_eq!(select_device("CPU").unwrap(), Device::Cpu);
        assert_eq!(select_device("-1").unwrap(), Device::Cpu);
    }

    #[test]
    fn test_accelerator_is_unavailable() {
        match select_device("1-2") {
            Err(Error::Resource(ResourceError::DeviceUnavailable { id })) => assert_eq!(id, "1"),
            other => panic!("expected DeviceUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_is_config_error() {
        assert!(matches!(select_device("gpu"), Err(Error::ConfigError(_))));
        assert!(matches!(select_device("0--1"), Err(Error::ConfigError(_))));
    }
}
