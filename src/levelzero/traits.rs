//! Device pool for Intel accelerators
//!
//! Every call addresses one chip as `(gpu, subdevice)`. A GPU without
//! sub-devices is reported as a single chip. Frequencies are in MHz.

use crate::error::HardwareError;

/// Chip-indexed access to every Intel accelerator on the node
pub trait LevelZeroDevicePool {
    /// Number of accelerator boards
    fn num_gpu(&self) -> Result<usize, HardwareError>;

    /// Total number of chips across all boards
    fn num_gpu_chip(&self) -> Result<usize, HardwareError>;

    /// Current compute clock
    fn frequency_status(&self, gpu: usize, subdevice: usize) -> Result<f64, HardwareError>;

    /// Most efficient compute clock
    fn frequency_efficient(&self, gpu: usize, subdevice: usize) -> Result<f64, HardwareError>;

    /// Lowest compute clock the hardware supports
    fn frequency_min(&self, gpu: usize, subdevice: usize) -> Result<f64, HardwareError>;

    /// Highest compute clock the hardware supports
    fn frequency_max(&self, gpu: usize, subdevice: usize) -> Result<f64, HardwareError>;

    /// Requested `(min, max)` compute clock window
    fn frequency_range(&self, gpu: usize, subdevice: usize) -> Result<(f64, f64), HardwareError>;

    /// Request a compute clock window
    fn frequency_control(
        &self,
        gpu: usize,
        subdevice: usize,
        min_mhz: f64,
        max_mhz: f64,
    ) -> Result<(), HardwareError>;
}
