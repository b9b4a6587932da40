//! Periodic signal monitor
//!
//! Pushes a fixed set of signals once, then samples them at a regular
//! interval, formatting each value the way its signal asks for.

use crate::error::{AppError, PlatformError};
use crate::iogroup::{Format, PlatformIo};
use crate::topo::Domain;

use std::time::Duration;

/// One signal to sample
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRequest {
    pub name: String,
    pub domain: Domain,
    pub index: usize,
}

impl SignalRequest {
    pub fn new(name: impl Into<String>, domain: Domain, index: usize) -> Self {
        Self {
            name: name.into(),
            domain,
            index,
        }
    }

    /// Column header, e.g. `CPU_FREQUENCY_STATUS@core-2`
    pub fn header(&self) -> String {
        format!("{}@{}-{}", self.name, self.domain, self.index)
    }
}

/// Configuration for the monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between samples
    pub interval: Duration,
    /// Stop after this many samples; run forever if unset
    pub count: Option<usize>,
    /// Whether to keep going after a failed sample
    pub retry: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            count: None,
            retry: false,
        }
    }
}

/// Sampling loop over pushed signals
pub struct Monitor {
    config: MonitorConfig,
    requests: Vec<SignalRequest>,
    handles: Vec<(usize, Format)>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, requests: Vec<SignalRequest>) -> Self {
        Self {
            config,
            requests,
            handles: Vec::new(),
        }
    }

    /// Push every requested signal; must precede the first tick
    pub fn init(&mut self, platform: &mut PlatformIo) -> Result<(), PlatformError> {
        let mut handles = Vec::with_capacity(self.requests.len());
        for request in &self.requests {
            let format = platform.format(&request.name)?;
            let handle = platform.push_signal(&request.name, request.domain, request.index)?;
            handles.push((handle, format));
        }
        log::debug!("Monitor pushed {} signal(s)", handles.len());
        self.handles = handles;
        Ok(())
    }

    /// Column headers in request order
    pub fn headers(&self) -> Vec<String> {
        self.requests.iter().map(SignalRequest::header).collect()
    }

    /// Read one batch and format every sample
    pub fn tick(&self, platform: &mut PlatformIo) -> Result<Vec<String>, PlatformError> {
        platform.read_batch()?;
        self.handles
            .iter()
            .map(|&(handle, format)| Ok(format.format(platform.sample(handle)?)))
            .collect()
    }

    /// Sample until the configured count is reached, handing each row to `emit`
    pub fn run<F>(&mut self, platform: &mut PlatformIo, mut emit: F) -> Result<(), AppError>
    where
        F: FnMut(&[String]) -> Result<(), AppError>,
    {
        if self.handles.len() != self.requests.len() {
            self.init(platform)?;
        }
        let mut taken = 0;
        loop {
            match self.tick(platform) {
                Ok(row) => emit(&row)?,
                Err(e) => {
                    log::error!("Monitor sample failed: {}", e);
                    if !self.config.retry {
                        return Err(e.into());
                    }
                }
            }
            taken += 1;

            if self.config.count.is_some_and(|count| taken >= count) {
                break;
            }
            std::thread::sleep(self.config.interval);
        }
        Ok(())
    }

    /// Get the monitor configuration
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}
