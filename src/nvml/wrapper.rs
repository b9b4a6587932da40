//! NVML device pool implementation
//!
//! Provides the production [`NvmlDevicePool`] on top of nvml-wrapper.

use crate::error::HardwareError;
use crate::nvml::device::{
    convert_error, reset_gpu_locked_clocks_raw, set_gpu_locked_clocks_raw,
    supported_graphics_clocks_raw,
};
use crate::nvml::traits::NvmlDevicePool;

use nvml_wrapper::enum_wrappers::device::{Clock, PcieUtilCounter, TemperatureSensor};
use nvml_wrapper::{Device, Nvml};

/// NVML-backed pool of accelerator devices
pub struct NvmlPool {
    nvml: Nvml,
}

impl NvmlPool {
    /// Initialize NVML
    pub fn new() -> Result<Self, HardwareError> {
        let nvml = Nvml::init().map_err(|e| match e {
            nvml_wrapper::error::NvmlError::LibloadingError(_) => HardwareError::LibraryNotFound,
            nvml_wrapper::error::NvmlError::DriverNotLoaded => {
                HardwareError::InitializationFailed("NVIDIA driver not loaded".to_string())
            }
            other => HardwareError::InitializationFailed(other.to_string()),
        })?;

        Ok(Self { nvml })
    }

    fn device(&self, gpu: usize) -> Result<Device<'_>, HardwareError> {
        let index = gpu as u32;
        self.nvml.device_by_index(index).map_err(|e| match e {
            nvml_wrapper::error::NvmlError::NotFound => HardwareError::DeviceNotFound(index),
            other => convert_error(other),
        })
    }
}

impl NvmlDevicePool for NvmlPool {
    fn num_gpu(&self) -> Result<usize, HardwareError> {
        self.nvml
            .device_count()
            .map(|c| c as usize)
            .map_err(convert_error)
    }

    fn frequency_status_sm(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.device(gpu)?.clock_info(Clock::SM).map_err(convert_error)
    }

    fn frequency_status_mem(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.device(gpu)?.clock_info(Clock::Memory).map_err(convert_error)
    }

    fn supported_frequencies_sm(&self, gpu: usize) -> Result<Vec<u32>, HardwareError> {
        let device = self.device(gpu)?;
        // SAFETY: handle() is safe to call within the lifetime of the Device
        supported_graphics_clocks_raw(unsafe { device.handle() })
    }

    fn utilization(&self, gpu: usize) -> Result<u32, HardwareError> {
        let util = self.device(gpu)?.utilization_rates().map_err(convert_error)?;
        Ok(util.gpu)
    }

    fn utilization_mem(&self, gpu: usize) -> Result<u32, HardwareError> {
        let util = self.device(gpu)?.utilization_rates().map_err(convert_error)?;
        Ok(util.memory)
    }

    fn power(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.device(gpu)?.power_usage().map_err(convert_error)
    }

    fn power_limit(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.device(gpu)?
            .power_management_limit()
            .map_err(convert_error)
    }

    fn throttle_reasons(&self, gpu: usize) -> Result<u64, HardwareError> {
        let reasons = self
            .device(gpu)?
            .current_throttle_reasons()
            .map_err(convert_error)?;
        Ok(reasons.bits())
    }

    fn temperature(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.device(gpu)?
            .temperature(TemperatureSensor::Gpu)
            .map_err(convert_error)
    }

    fn energy(&self, gpu: usize) -> Result<u64, HardwareError> {
        self.device(gpu)?
            .total_energy_consumption()
            .map_err(convert_error)
    }

    fn performance_state(&self, gpu: usize) -> Result<u32, HardwareError> {
        let state = self
            .device(gpu)?
            .performance_state()
            .map_err(convert_error)?;
        Ok(state as u32)
    }

    fn throughput_rx_pcie(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.device(gpu)?
            .pcie_throughput(PcieUtilCounter::Receive)
            .map_err(convert_error)
    }

    fn throughput_tx_pcie(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.device(gpu)?
            .pcie_throughput(PcieUtilCounter::Send)
            .map_err(convert_error)
    }

    fn frequency_control_sm(&self, gpu: usize, min_mhz: u32, max_mhz: u32) -> Result<(), HardwareError> {
        let device = self.device(gpu)?;
        // SAFETY: handle() is safe to call within the lifetime of the Device
        set_gpu_locked_clocks_raw(unsafe { device.handle() }, min_mhz, max_mhz)
    }

    fn frequency_reset_control(&self, gpu: usize) -> Result<(), HardwareError> {
        let device = self.device(gpu)?;
        // SAFETY: handle() is safe to call within the lifetime of the Device
        reset_gpu_locked_clocks_raw(unsafe { device.handle() })
    }

    fn power_control(&self, gpu: usize, limit_mw: u32) -> Result<(), HardwareError> {
        self.device(gpu)?
            .set_power_management_limit(limit_mw)
            .map_err(convert_error)
    }

    fn is_privileged_access(&self) -> bool {
        // SAFETY: geteuid has no preconditions
        unsafe { libc::geteuid() == 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require actual NVIDIA hardware and drivers

    #[test]
    #[ignore = "Requires NVIDIA GPU"]
    fn test_nvml_init() {
        let pool = NvmlPool::new();
        assert!(pool.is_ok());
    }

    #[test]
    #[ignore = "Requires NVIDIA GPU"]
    fn test_supported_frequencies() {
        let pool = NvmlPool::new().unwrap();
        assert!(pool.num_gpu().unwrap() > 0);
        assert!(!pool.supported_frequencies_sm(0).unwrap().is_empty());
    }
}
