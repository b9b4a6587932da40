//! Control-loop consumers of [`PlatformIo`](crate::iogroup::PlatformIo)
//!
//! - [`FrequencyGovernor`]: clamped per-domain core frequency requests
//! - [`Monitor`]: periodic sampling of pushed signals

pub mod frequency_governor;
pub mod monitor;

pub use frequency_governor::FrequencyGovernor;
pub use monitor::{Monitor, MonitorConfig, SignalRequest};
