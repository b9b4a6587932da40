//! Configuration system
//!
//! Handles TOML config file parsing and CLI argument merging.

pub mod builder;
pub mod file;

pub use builder::ConfigBuilder;
pub use file::ConfigFile;

use crate::levelzero::drm::DEFAULT_DRM_ROOT;
use crate::topo::sysfs::DEFAULT_CPU_ROOT;
use crate::topo::TopoCounts;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Static topology overriding detection
    pub topology: TopologyConfig,
    /// Backend selection
    pub backends: BackendsConfig,
    /// Control snapshot settings
    pub save: SaveConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,
    /// Dry run mode
    pub dry_run: bool,
    /// Monitor sampling interval in seconds
    pub interval_seconds: f64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            dry_run: false,
            interval_seconds: 1.0,
        }
    }
}

/// Optional static topology
///
/// When `packages` is set the CPU layout is taken from here instead of
/// sysfs. GPU and GPU chip counts fall back to what the GPU backends report.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct TopologyConfig {
    pub packages: Option<usize>,
    pub cores_per_package: Option<usize>,
    pub threads_per_core: Option<usize>,
    pub memory: Option<usize>,
    pub gpus: Option<usize>,
    pub gpu_chips: Option<usize>,
}

impl TopologyConfig {
    /// CPU-side counts if a static layout is configured
    pub fn cpu_counts(&self) -> Option<TopoCounts> {
        let num_package = self.packages?;
        Some(TopoCounts {
            num_package,
            cores_per_package: self.cores_per_package.unwrap_or(1),
            threads_per_core: self.threads_per_core.unwrap_or(1),
            num_memory: self.memory.unwrap_or(0),
            ..TopoCounts::default()
        })
    }
}

/// Backend enable flags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendsConfig {
    pub nvml: bool,
    pub levelzero: bool,
    pub sst: bool,
    pub cpufreq: bool,
    /// Root of the sysfs CPU tree
    pub cpu_root: PathBuf,
    /// Root of the sysfs DRM tree scanned for Intel GPUs
    pub drm_root: PathBuf,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            nvml: true,
            levelzero: true,
            sst: true,
            cpufreq: true,
            cpu_root: PathBuf::from(DEFAULT_CPU_ROOT),
            drm_root: PathBuf::from(DEFAULT_DRM_ROOT),
        }
    }
}

/// Control snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SaveConfig {
    /// Default path for `save`/`restore`
    pub path: PathBuf,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("platio-save.json"),
        }
    }
}
