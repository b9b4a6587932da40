//! Intel Speed Select Technology backend
//!
//! - [`io`]: transport trait and batch collector
//! - [`ioctl`]: `/dev/isst_interface` implementation
//! - [`iogroup`]: signal/control tables

pub mod io;
pub mod iogroup;
pub mod ioctl;

pub use io::{SstIo, SstRequest};
pub use iogroup::SstIoGroup;
pub use ioctl::{IsstDevice, ISST_DEVICE_PATH};
