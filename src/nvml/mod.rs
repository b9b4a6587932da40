//! NVML backend
//!
//! [`NvmlDevicePool`] abstracts the driver so the IoGroup can be tested
//! against a fake pool; [`NvmlPool`] is the production implementation.

pub mod device;
pub mod iogroup;
pub mod traits;
pub mod wrapper;

pub use iogroup::NvmlIoGroup;
pub use traits::NvmlDevicePool;
pub use wrapper::NvmlPool;
