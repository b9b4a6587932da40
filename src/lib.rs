//! platio - batched access to CPU and GPU power/performance hardware
//!
//! Signals (readable values) and controls (writable settings) from several
//! hardware backends are exposed behind one namespace, addressed by name,
//! domain and domain index. Reads and writes can be issued immediately or
//! collected into batches.
//!
//! # Modules
//!
//! - [`topo`]: Platform topology and domain nesting
//! - [`iogroup`]: Signal/control objects, batch registry and `PlatformIo`
//! - [`nvml`]: NVIDIA GPU backend
//! - [`levelzero`]: Intel GPU backend with per-chip domains
//! - [`sst`]: Intel Speed Select backend
//! - [`cpufreq`]: Linux cpufreq backend
//! - [`services`]: Frequency governor and signal monitor
//! - [`cli`]: Command-line interface definitions
//! - [`commands`]: Command handlers
//! - [`config`]: Configuration system
//! - [`error`]: Error types

pub mod cli;
pub mod commands;
pub mod config;
pub mod cpufreq;
pub mod error;
pub mod iogroup;
pub mod levelzero;
pub mod nvml;
pub mod services;
pub mod sst;
pub mod topo;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{AppError, Result};
