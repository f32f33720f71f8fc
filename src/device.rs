//! # Device Detection and Management
//!
//! Selects the compute device (CPU/GPU) the snore classifier runs on.
//! The preference comes from `models.device` in the configuration or from
//! the `device` field of a model load request.

use candle_core::Device;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Cached best available device to avoid repeated detection
static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

/// Device preferences for model inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Automatically select the best available device
    #[default]
    Auto,
    /// Force CPU usage
    Cpu,
    /// CUDA GPU (falls back to CPU if not available)
    Cuda,
    /// Metal GPU (falls back to CPU if not available)
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

/// Device detection and selection utilities
pub struct DeviceManager;

impl DeviceManager {
    /// Get the best available device based on preference
    pub fn get_device(preference: DevicePreference) -> Device {
        match preference {
            DevicePreference::Auto => Self::get_best_device(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Self::get_cuda_device().unwrap_or(Device::Cpu),
            DevicePreference::Metal => Self::get_metal_device().unwrap_or(Device::Cpu),
        }
    }

    /// Resolve a configured device name.
    pub fn resolve(name: &str) -> Result<Device, String> {
        let preference: DevicePreference = name.parse()?;
        let device = Self::get_device(preference);
        debug!("Device preference '{}' resolved to {}", name, Self::get_device_info(&device));
        Ok(device)
    }

    /// Get the best available device (cached)
    pub fn get_best_device() -> Device {
        BEST_DEVICE.get_or_init(Self::detect_best_device).clone()
    }

    fn detect_best_device() -> Device {
        info!("Detecting best available compute device...");

        if let Some(cuda_device) = Self::get_cuda_device() {
            info!("Selected CUDA GPU for snore classification");
            return cuda_device;
        }

        if let Some(metal_device) = Self::get_metal_device() {
            info!("Selected Metal GPU for snore classification");
            return metal_device;
        }

        // The CNN is small; CPU inference is the common case
        info!("Using CPU for snore classification");
        Device::Cpu
    }

    fn get_cuda_device() -> Option<Device> {
        match Device::new_cuda(0) {
            Ok(device) => {
                debug!("CUDA device 0 available");
                Some(device)
            }
            Err(e) => {
                debug!("CUDA not available: {}", e);
                None
            }
        }
    }

    fn get_metal_device() -> Option<Device> {
        match Device::new_metal(0) {
            Ok(device) => {
                debug!("Metal device 0 available");
                Some(device)
            }
            Err(e) => {
                debug!("Metal not available: {}", e);
                None
            }
        }
    }

    /// Human-readable device name for logs and status endpoints
    pub fn get_device_info(device: &Device) -> String {
        match device {
            Device::Cpu => "CPU".to_string(),
            Device::Cuda(_) => "CUDA GPU".to_string(),
            Device::Metal(_) => "Metal GPU (Apple Silicon)".to_string(),
        }
    }

    /// Device availability summary reported by `/health`
    pub fn get_device_summary() -> DeviceSummary {
        let cuda_available = Self::get_cuda_device().is_some();
        let metal_available = Self::get_metal_device().is_some();
        DeviceSummary {
            cuda_available,
            metal_available,
            gpu_available: cuda_available || metal_available,
            best_device: Self::get_device_info(&Self::get_best_device()),
        }
    }
}

/// Device availability summary
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub cuda_available: bool,
    pub metal_available: bool,
    pub gpu_available: bool,
    pub best_device: String,
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
    fn test_resolve_cpu() {
        assert!(matches!(DeviceManager::resolve("cpu").unwrap(), Device::Cpu));
        assert!(DeviceManager::resolve("abacus").is_err());
    }

    #[test]
    fn test_device_info_is_not_empty() {
        let device = DeviceManager::get_best_device();
        assert!(!DeviceManager::get_device_info(&device).is_empty());
    }
}
