//! Intel GPU backend
//!
//! Exposes per-chip (GPU sub-device) frequency signals and controls.
//! [`LevelZeroDevicePool`] abstracts the device so the IoGroup can be tested
//! against a fake pool; [`DrmPool`] reads the i915 sysfs tree.

pub mod drm;
pub mod iogroup;
pub mod traits;

pub use drm::DrmPool;
pub use iogroup::LevelZeroIoGroup;
pub use traits::LevelZeroDevicePool;
