//! # Compute Device Selection
//!
//! Maps the configured device preference to a Candle device, falling back to
//! the CPU when the requested accelerator is not available in this build or
//! on this machine.

use candle_core::Device;
use tracing::{debug, info, warn};

/// Device preferences for model inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Best available device: CUDA, then Metal, then CPU
    Auto,
    #[default]
    Cpu,
    /// CUDA GPU, CPU if not available
    Cuda,
    /// Metal GPU, CPU if not available
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

pub fn select_device(preference: DevicePreference) -> Device {
    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => cuda_device().unwrap_or(Device::Cpu),
        DevicePreference::Metal => metal_device().unwrap_or(Device::Cpu),
        DevicePreference::Auto => cuda_device().or_else(metal_device).unwrap_or(Device::Cpu),
    };

    info!(?preference, device = describe(&device), "Selected compute device");
    device
}

/// Parse a preference string; unknown values fall back to the CPU.
pub fn device_from_str(device_str: &str) -> Device {
    match device_str.parse::<DevicePreference>() {
        Ok(preference) => select_device(preference),
        Err(e) => {
            warn!("{}, using CPU", e);
            Device::Cpu
        }
    }
}

fn cuda_device() -> Option<Device> {
    match Device::new_cuda(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("CUDA not available: {}", e);
            None
        }
    }
}

fn metal_device() -> Option<Device> {
    match Device::new_metal(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("Metal not available: {}", e);
            None
        }
    }
}

pub fn describe(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "CPU",
        Device::Cuda(_) => "CUDA GPU",
        Device::Metal(_) => "Metal GPU",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("metal".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_cpu_always_available() {
        assert!(matches!(select_device(DevicePreference::Cpu), Device::Cpu));
        assert!(matches!(device_from_str("nonsense"), Device::Cpu));
        assert_eq!(describe(&Device::Cpu), "CPU");
    }
}
