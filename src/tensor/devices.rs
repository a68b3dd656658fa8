//! Device abstraction

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AnvilError, AnvilResult};

/// Device a tensor lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl Device {
    /// Only the CPU has kernels in this crate.
    pub fn ensure_supported(&self) -> AnvilResult<()> {
        match self {
            Device::Cpu => Ok(()),
            other => Err(AnvilError::device_error(
                &other.to_string(),
                "no compute kernels are available for this device",
            )),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(id) => write!(f, "cuda:{}", id),
            Device::Metal(id) => write!(f, "metal:{}", id),
        }
    }
}

impl FromStr for Device {
    type Err = AnvilError;

    fn from_str(s: &str) -> AnvilResult<Self> {
        let lower = s.trim().to_lowercase();
        let (kind, index) = match lower.split_once(':') {
            Some((kind, index)) => {
                let index = index
                    .parse::<usize>()
                    .map_err(|_| AnvilError::InvalidInput(format!("Invalid device index in '{}'", s)))?;
                (kind.to_string(), index)
            }
            None => (lower.clone(), 0),
        };

        match kind.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda(index)),
            "metal" => Ok(Device::Metal(index)),
            _ => Err(AnvilError::InvalidInput(format!("Unknown device: {}", s))),
        }
    }
}
