//! Core frequency governor
//!
//! Clamps per-domain frequency requests into a policy window and forwards the
//! ones that changed to `CPU_FREQUENCY_MAX_CONTROL` through [`PlatformIo`].

use crate::error::ServiceError;
use crate::iogroup::PlatformIo;
use crate::topo::Domain;

const FREQ_CONTROL: &str = "CPU_FREQUENCY_MAX_CONTROL";
const FREQ_MIN_SIGNAL: &str = "CPU_FREQUENCY_MIN_AVAIL";
const FREQ_MAX_SIGNAL: &str = "CPU_FREQUENCY_MAX_AVAIL";
const FREQ_STEP_SIGNAL: &str = "CPU_FREQUENCY_STEP";

/// Applies clamped frequency requests, one per instance of its control domain
#[derive(Debug)]
pub struct FrequencyGovernor {
    native_domain: Domain,
    domain: Domain,
    /// Batch handles per control domain instance; a coarser domain holds one
    /// handle per nested native instance
    handles: Vec<Vec<usize>>,
    last_requests: Vec<f64>,
    platform_min: f64,
    platform_max: f64,
    freq_min: f64,
    freq_max: f64,
    freq_step: f64,
    clamp_count: usize,
    do_write: bool,
    initialized: bool,
}

impl FrequencyGovernor {
    /// Read the platform frequency range; the control domain defaults to the
    /// native domain of the frequency control
    pub fn new(platform: &PlatformIo) -> Result<Self, ServiceError> {
        let native_domain = platform.control_domain_type(FREQ_CONTROL)?;
        let platform_min = platform.read_signal(FREQ_MIN_SIGNAL, Domain::Board, 0)?;
        let platform_max = platform.read_signal(FREQ_MAX_SIGNAL, Domain::Board, 0)?;
        let freq_step = if platform.is_valid_signal(FREQ_STEP_SIGNAL) {
            platform.read_signal(FREQ_STEP_SIGNAL, Domain::Board, 0)?
        } else {
            f64::NAN
        };
        Ok(Self {
            native_domain,
            domain: native_domain,
            handles: Vec::new(),
            last_requests: Vec::new(),
            platform_min,
            platform_max,
            freq_min: platform_min,
            freq_max: platform_max,
            freq_step,
            clamp_count: 0,
            do_write: false,
            initialized: false,
        })
    }

    /// Choose the domain requests are made at
    ///
    /// Must happen before [`init_platform_io`](Self::init_platform_io), and the
    /// domain must contain the native domain of the frequency control.
    pub fn set_domain_type(&mut self, platform: &PlatformIo, domain: Domain) -> Result<(), ServiceError> {
        if self.initialized {
            return Err(ServiceError::InvalidState(
                "set_domain_type() called after init_platform_io()".to_string(),
            ));
        }
        if !platform.topo().is_nested_domain(self.native_domain, domain) {
            return Err(ServiceError::InvalidDomain {
                requested: domain,
                native: self.native_domain,
            });
        }
        self.domain = domain;
        Ok(())
    }

    /// Push the frequency control for every instance of the control domain
    pub fn init_platform_io(&mut self, platform: &mut PlatformIo) -> Result<(), ServiceError> {
        if self.initialized {
            return Err(ServiceError::InvalidState(
                "init_platform_io() called twice".to_string(),
            ));
        }
        let count = platform.topo().num_domain(self.domain);
        let mut handles = Vec::with_capacity(count);
        for idx in 0..count {
            let nested = platform
                .topo()
                .domain_nested(self.native_domain, self.domain, idx)
                .map_err(crate::error::PlatformError::from)?;
            let mut group = Vec::with_capacity(nested.len());
            for native_idx in nested {
                group.push(platform.push_control(FREQ_CONTROL, self.native_domain, native_idx)?);
            }
            handles.push(group);
        }
        log::debug!(
            "Frequency governor controls {} {} domain(s)",
            handles.len(),
            self.domain
        );
        self.last_requests = vec![f64::NAN; handles.len()];
        self.handles = handles;
        self.initialized = true;
        Ok(())
    }

    /// Number of requests [`adjust_platform`](Self::adjust_platform) expects
    pub fn num_domain(&self) -> usize {
        self.handles.len()
    }

    /// Clamp each request into the policy window and adjust the ones that changed
    pub fn adjust_platform(
        &mut self,
        platform: &mut PlatformIo,
        requests: &[f64],
    ) -> Result<(), ServiceError> {
        if !self.initialized {
            return Err(ServiceError::InvalidState(
                "adjust_platform() called before init_platform_io()".to_string(),
            ));
        }
        if requests.len() != self.handles.len() {
            return Err(ServiceError::RequestSize {
                expected: self.handles.len(),
                actual: requests.len(),
            });
        }
        self.do_write = false;
        for (idx, &request) in requests.iter().enumerate() {
            let clamped = request.clamp(self.freq_min, self.freq_max);
            if clamped != request {
                self.clamp_count += 1;
            }
            if clamped == self.last_requests[idx] {
                continue;
            }
            for &handle in &self.handles[idx] {
                platform.adjust(handle, clamped)?;
            }
            self.last_requests[idx] = clamped;
            self.do_write = true;
        }
        Ok(())
    }

    /// True if the last [`adjust_platform`](Self::adjust_platform) changed a setting
    pub fn do_write_batch(&self) -> bool {
        self.do_write
    }

    /// Replace the policy window
    ///
    /// Returns `Ok(false)` when the window is unchanged.
    pub fn set_frequency_bounds(&mut self, freq_min: f64, freq_max: f64) -> Result<bool, ServiceError> {
        if freq_min.is_nan()
            || freq_max.is_nan()
            || freq_min < self.platform_min
            || freq_max > self.platform_max
            || freq_min > freq_max
        {
            return Err(ServiceError::InvalidBounds {
                min: freq_min,
                max: freq_max,
                platform_min: self.platform_min,
                platform_max: self.platform_max,
            });
        }
        if freq_min == self.freq_min && freq_max == self.freq_max {
            return Ok(false);
        }
        self.freq_min = freq_min;
        self.freq_max = freq_max;
        Ok(true)
    }

    /// Fill unset (NaN) policy values with the platform range and clamp the rest into it
    pub fn validate_policy(&self, freq_min: f64, freq_max: f64) -> (f64, f64) {
        let fill = |value: f64, default: f64| {
            if value.is_nan() {
                default
            } else {
                value.clamp(self.platform_min, self.platform_max)
            }
        };
        (
            fill(freq_min, self.platform_min),
            fill(freq_max, self.platform_max),
        )
    }

    pub fn frequency_min(&self) -> f64 {
        self.freq_min
    }

    pub fn frequency_max(&self) -> f64 {
        self.freq_max
    }

    /// NaN when the platform does not report a step
    pub fn frequency_step(&self) -> f64 {
        self.freq_step
    }

    /// Requests clamped since construction
    pub fn clamp_count(&self) -> usize {
        self.clamp_count
    }

    pub fn domain_type(&self) -> Domain {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpufreq::CpufreqIoGroup;
    use crate::iogroup::IoGroup;
    use crate::mock::{cpu_topo, cpufreq_tree};
    use std::fs;
    use std::path::Path;

    const MIN_KHZ: u64 = 1_000_000;
    const MAX_KHZ: u64 = 3_700_000;

    fn platform(root: &Path) -> PlatformIo {
        let topo = cpu_topo(1, 4, 1);
        let group: Box<dyn IoGroup> = Box::new(CpufreqIoGroup::with_root(&topo, root).unwrap());
        PlatformIo::new(topo, vec![group])
    }

    fn scaling_max(root: &Path, cpu: usize) -> String {
        fs::read_to_string(root.join(format!("cpu{}/cpufreq/scaling_max_freq", cpu)))
            .unwrap()
            .trim()
            .to_string()
    }

    #[test]
    fn test_platform_range() {
        let tree = cpufreq_tree(4, MIN_KHZ, MAX_KHZ);
        let governor = FrequencyGovernor::new(&platform(tree.path())).unwrap();
        assert_eq!(governor.frequency_min(), 1.0e9);
        assert_eq!(governor.frequency_max(), 3.7e9);
        assert!(governor.frequency_step().is_nan());
        assert_eq!(governor.domain_type(), Domain::Core);
    }

    #[test]
    fn test_adjust_within_bounds() {
        let tree = cpufreq_tree(4, MIN_KHZ, MAX_KHZ);
        let mut platform = platform(tree.path());
        let mut governor = FrequencyGovernor::new(&platform).unwrap();
        governor.init_platform_io(&mut platform).unwrap();
        assert_eq!(governor.num_domain(), 4);

        let request = [1.1e9, 1.2e9, 1.5e9, 1.7e9];
        governor.adjust_platform(&mut platform, &request).unwrap();
        assert!(governor.do_write_batch());
        assert_eq!(governor.clamp_count(), 0);
        platform.write_batch().unwrap();
        assert_eq!(scaling_max(tree.path(), 0), "1100000");
        assert_eq!(scaling_max(tree.path(), 3), "1700000");

        // same request again: nothing to write
        governor.adjust_platform(&mut platform, &request).unwrap();
        assert!(!governor.do_write_batch());
    }

    #[test]
    fn test_adjust_clamps_to_bounds() {
        let tree = cpufreq_tree(4, MIN_KHZ, MAX_KHZ);
        let mut platform = platform(tree.path());
        let mut governor = FrequencyGovernor::new(&platform).unwrap();
        governor.init_platform_io(&mut platform).unwrap();

        governor
            .adjust_platform(&mut platform, &[4.1e9, 1.2e9, 1.5e9, 0.7e9])
            .unwrap();
        assert_eq!(governor.clamp_count(), 2);
        platform.write_batch().unwrap();
        assert_eq!(scaling_max(tree.path(), 0), "3700000");
        assert_eq!(scaling_max(tree.path(), 1), "1200000");
        assert_eq!(scaling_max(tree.path(), 2), "1500000");
        assert_eq!(scaling_max(tree.path(), 3), "1000000");
    }

    #[test]
    fn test_request_size_mismatch() {
        let tree = cpufreq_tree(4, MIN_KHZ, MAX_KHZ);
        let mut platform = platform(tree.path());
        let mut governor = FrequencyGovernor::new(&platform).unwrap();
        governor.init_platform_io(&mut platform).unwrap();
        assert!(matches!(
            governor.adjust_platform(&mut platform, &[1.0e9, 1.0e9]),
            Err(ServiceError::RequestSize {
                expected: 4,
                actual: 2
            })
        ));
        assert!(matches!(
            governor.adjust_platform(&mut platform, &[]),
            Err(ServiceError::RequestSize { .. })
        ));
    }

    #[test]
    fn test_adjust_before_init() {
        let tree = cpufreq_tree(4, MIN_KHZ, MAX_KHZ);
        let mut platform = platform(tree.path());
        let mut governor = FrequencyGovernor::new(&platform).unwrap();
        assert!(matches!(
            governor.adjust_platform(&mut platform, &[1.0e9; 4]),
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[test]
    fn test_set_frequency_bounds() {
        let tree = cpufreq_tree(4, MIN_KHZ, MAX_KHZ);
        let mut platform = platform(tree.path());
        let mut governor = FrequencyGovernor::new(&platform).unwrap();
        governor.init_platform_io(&mut platform).unwrap();

        assert!(governor.set_frequency_bounds(1.5e9, 3.0e9).unwrap());
        assert!(!governor.set_frequency_bounds(1.5e9, 3.0e9).unwrap());
        assert_eq!(governor.frequency_min(), 1.5e9);
        assert_eq!(governor.frequency_max(), 3.0e9);

        for (min, max) in [(0.5e9, 3.0e9), (1.5e9, 4.0e9), (3.0e9, 1.5e9), (f64::NAN, 3.0e9)] {
            assert!(matches!(
                governor.set_frequency_bounds(min, max),
                Err(ServiceError::InvalidBounds { .. })
            ));
        }
        // failed updates leave the window alone
        assert_eq!(governor.frequency_min(), 1.5e9);

        governor
            .adjust_platform(&mut platform, &[1.0e9, 2.0e9, 3.5e9, 2.5e9])
            .unwrap();
        assert_eq!(governor.clamp_count(), 2);
        platform.write_batch().unwrap();
        assert_eq!(scaling_max(tree.path(), 0), "1500000");
        assert_eq!(scaling_max(tree.path(), 2), "3000000");
    }

    #[test]
    fn test_validate_policy() {
        let tree = cpufreq_tree(4, MIN_KHZ, MAX_KHZ);
        let governor = FrequencyGovernor::new(&platform(tree.path())).unwrap();
        assert_eq!(governor.validate_policy(f64::NAN, f64::NAN), (1.0e9, 3.7e9));
        assert_eq!(governor.validate_policy(1.2e9, 1.3e9), (1.2e9, 1.3e9));
        assert_eq!(governor.validate_policy(0.5e9, 5.0e9), (1.0e9, 3.7e9));
        assert_eq!(governor.validate_policy(2.0e9, f64::NAN), (2.0e9, 3.7e9));
    }

    #[test]
    fn test_set_domain_type() {
        let tree = cpufreq_tree(4, MIN_KHZ, MAX_KHZ);
        let mut platform = platform(tree.path());
        let mut governor = FrequencyGovernor::new(&platform).unwrap();

        assert!(matches!(
            governor.set_domain_type(&platform, Domain::Cpu),
            Err(ServiceError::InvalidDomain {
                requested: Domain::Cpu,
                native: Domain::Core
            })
        ));
        governor.set_domain_type(&platform, Domain::Board).unwrap();
        governor.init_platform_io(&mut platform).unwrap();
        assert_eq!(governor.num_domain(), 1);
        assert!(matches!(
            governor.set_domain_type(&platform, Domain::Core),
            Err(ServiceError::InvalidState(_))
        ));

        governor.adjust_platform(&mut platform, &[2.0e9]).unwrap();
        platform.write_batch().unwrap();
        for cpu in 0..4 {
            assert_eq!(scaling_max(tree.path(), cpu), "2000000");
        }
    }
}
