//! Trait definitions for accelerator access
//!
//! The IoGroup talks to accelerators only through [`NvmlDevicePool`] so it can
//! be driven by a fake pool in tests. Values are returned in the units the
//! driver reports (MHz, mW, mJ, KB/s, percent); conversion to SI units
//! happens in the IoGroup.

use crate::error::HardwareError;

/// Device-indexed access to every accelerator on the node
pub trait NvmlDevicePool {
    /// Number of accelerator boards
    fn num_gpu(&self) -> Result<usize, HardwareError>;

    /// Current streaming multiprocessor clock in MHz
    fn frequency_status_sm(&self, gpu: usize) -> Result<u32, HardwareError>;

    /// Current memory clock in MHz
    fn frequency_status_mem(&self, gpu: usize) -> Result<u32, HardwareError>;

    /// Supported streaming multiprocessor clocks in MHz, any order
    fn supported_frequencies_sm(&self, gpu: usize) -> Result<Vec<u32>, HardwareError>;

    /// Core utilization in percent
    fn utilization(&self, gpu: usize) -> Result<u32, HardwareError>;

    /// Memory controller utilization in percent
    fn utilization_mem(&self, gpu: usize) -> Result<u32, HardwareError>;

    /// Board power draw in mW
    fn power(&self, gpu: usize) -> Result<u32, HardwareError>;

    /// Enforced power limit in mW
    fn power_limit(&self, gpu: usize) -> Result<u32, HardwareError>;

    /// Bit mask of active clock throttle reasons
    fn throttle_reasons(&self, gpu: usize) -> Result<u64, HardwareError>;

    /// Die temperature in degrees Celsius
    fn temperature(&self, gpu: usize) -> Result<u32, HardwareError>;

    /// Energy consumed since driver load in mJ
    fn energy(&self, gpu: usize) -> Result<u64, HardwareError>;

    /// Performance state, 0 (fastest) to 15
    fn performance_state(&self, gpu: usize) -> Result<u32, HardwareError>;

    /// PCIe receive throughput in KB/s
    fn throughput_rx_pcie(&self, gpu: usize) -> Result<u32, HardwareError>;

    /// PCIe transmit throughput in KB/s
    fn throughput_tx_pcie(&self, gpu: usize) -> Result<u32, HardwareError>;

    /// Lock the core clock into `[min_mhz, max_mhz]`
    fn frequency_control_sm(&self, gpu: usize, min_mhz: u32, max_mhz: u32) -> Result<(), HardwareError>;

    /// Release a core clock lock
    fn frequency_reset_control(&self, gpu: usize) -> Result<(), HardwareError>;

    /// Set the power limit in mW
    fn power_control(&self, gpu: usize, limit_mw: u32) -> Result<(), HardwareError>;

    /// True if the process may change device settings
    fn is_privileged_access(&self) -> bool;
}
