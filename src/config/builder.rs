//! Configuration builder
//!
//! Merges configuration from files and CLI arguments.

use crate::config::{Config, ConfigFile};

use std::path::PathBuf;

/// Builder for merging configuration sources
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Load configuration from a file, or the default locations if `path` is unset
    pub fn with_file(mut self, path: Option<&str>) -> Self {
        let file_config = match path {
            Some(path) => match ConfigFile::load(path) {
                Ok(cfg) => Some(cfg),
                Err(e) => {
                    log::warn!("{}", e);
                    None
                }
            },
            None => ConfigFile::load_default(),
        };

        if let Some(cfg) = file_config {
            self.config = cfg;
        }

        self
    }

    /// Override with CLI verbose flag
    pub fn with_verbose(mut self, verbose: Option<bool>) -> Self {
        if let Some(v) = verbose {
            self.config.general.verbose = v;
        }
        self
    }

    /// Override with CLI dry-run flag
    pub fn with_dry_run(mut self, dry_run: Option<bool>) -> Self {
        if let Some(d) = dry_run {
            self.config.general.dry_run = d;
        }
        self
    }

    /// Override with CLI interval
    pub fn with_interval(mut self, interval: Option<f64>) -> Self {
        if let Some(i) = interval {
            self.config.general.interval_seconds = i;
        }
        self
    }

    /// Override the sysfs CPU root
    pub fn with_cpu_root(mut self, root: Option<PathBuf>) -> Self {
        if let Some(r) = root {
            self.config.backends.cpu_root = r;
        }
        self
    }

    /// Restrict loading to the named backends
    pub fn with_backends(mut self, names: Option<&[String]>) -> Self {
        if let Some(names) = names {
            let wants = |backend: &str| names.iter().any(|n| n.eq_ignore_ascii_case(backend));
            self.config.backends.nvml = wants("nvml");
            self.config.backends.levelzero = wants("levelzero");
            self.config.backends.sst = wants("sst");
            self.config.backends.cpufreq = wants("cpufreq");
        }
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
