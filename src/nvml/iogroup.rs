//! NVML IoGroup
//!
//! Exposes accelerator telemetry and the core frequency / power limit
//! controls of every GPU. Driver units are converted to SI here.

use crate::error::{HardwareError, PlatformError};
use crate::iogroup::object::{
    ClosureControl, ClosureSignal, ControlSink, Requirement, SignalSource, Trigger, WriteDependency,
};
use crate::iogroup::{
    Aggregation, BatchRegistry, Behavior, ControlInfo, ControlSetting, IoGroup, SignalInfo, Units,
};
use crate::nvml::traits::NvmlDevicePool;
use crate::topo::{Domain, PlatformTopo};

use std::cell::RefCell;
use std::rc::Rc;

const PREFIX: &str = "NVML::";

/// Last (min, max) core frequency request per GPU in Hz
type RequestCache = Rc<RefCell<Vec<(f64, f64)>>>;

/// Supported core frequency range of one GPU in Hz
#[derive(Debug, Clone, Copy)]
struct FrequencyRange {
    min: f64,
    max: f64,
    step: f64,
}

impl FrequencyRange {
    fn from_supported(mut mhz: Vec<u32>) -> Option<Self> {
        mhz.sort_unstable();
        let (&first, &last) = (mhz.first()?, mhz.last()?);
        let step = if mhz.len() >= 2 {
            f64::from(last - first) / (mhz.len() - 1) as f64 * 1e6
        } else {
            f64::NAN
        };
        Some(Self {
            min: f64::from(first) * 1e6,
            max: f64::from(last) * 1e6,
            step,
        })
    }
}

/// Pool reading converted to an SI value
type Reading = fn(&dyn NvmlDevicePool, usize) -> Result<f64, HardwareError>;

struct SignalDef {
    name: &'static str,
    description: &'static str,
    units: Units,
    aggregation: Aggregation,
    behavior: Behavior,
    read: Reading,
}

const TELEMETRY: &[SignalDef] = &[
    SignalDef {
        name: "GPU_CORE_FREQUENCY_STATUS",
        description: "Streaming multiprocessor frequency",
        units: Units::Hertz,
        aggregation: Aggregation::Average,
        behavior: Behavior::Variable,
        read: |pool, gpu| Ok(f64::from(pool.frequency_status_sm(gpu)?) * 1e6),
    },
    SignalDef {
        name: "GPU_UTILIZATION",
        description: "Fraction of time the GPU operated on a kernel in the last set of driver samples",
        units: Units::None,
        aggregation: Aggregation::Average,
        behavior: Behavior::Variable,
        read: |pool, gpu| Ok(f64::from(pool.utilization(gpu)?) / 100.0),
    },
    SignalDef {
        name: "GPU_POWER",
        description: "GPU power usage",
        units: Units::Watts,
        aggregation: Aggregation::Sum,
        behavior: Behavior::Variable,
        read: |pool, gpu| Ok(f64::from(pool.power(gpu)?) / 1e3),
    },
    SignalDef {
        name: "GPU_POWER_LIMIT_CONTROL",
        description: "GPU power limit",
        units: Units::Watts,
        aggregation: Aggregation::Sum,
        behavior: Behavior::Variable,
        read: |pool, gpu| Ok(f64::from(pool.power_limit(gpu)?) / 1e3),
    },
    SignalDef {
        name: "GPU_UNCORE_FREQUENCY_STATUS",
        description: "GPU memory frequency",
        units: Units::Hertz,
        aggregation: Aggregation::Average,
        behavior: Behavior::Variable,
        read: |pool, gpu| Ok(f64::from(pool.frequency_status_mem(gpu)?) * 1e6),
    },
    SignalDef {
        name: "GPU_CORE_THROTTLE_REASONS",
        description: "GPU clock throttling reasons",
        units: Units::None,
        aggregation: Aggregation::IntegerBitwiseOr,
        behavior: Behavior::Variable,
        read: |pool, gpu| Ok(pool.throttle_reasons(gpu)? as f64),
    },
    SignalDef {
        name: "GPU_TEMPERATURE",
        description: "GPU temperature",
        units: Units::Celsius,
        aggregation: Aggregation::Average,
        behavior: Behavior::Variable,
        read: |pool, gpu| Ok(f64::from(pool.temperature(gpu)?)),
    },
    SignalDef {
        name: "GPU_ENERGY_CONSUMPTION_TOTAL",
        description: "GPU energy consumption since the driver was loaded",
        units: Units::Joules,
        aggregation: Aggregation::Sum,
        behavior: Behavior::Monotone,
        read: |pool, gpu| Ok(pool.energy(gpu)? as f64 / 1e3),
    },
    SignalDef {
        name: "GPU_PERFORMANCE_STATE",
        description: "GPU performance state from 0 (maximum performance) to 15 (minimum performance), 32 if unknown",
        units: Units::None,
        aggregation: Aggregation::ExpectSame,
        behavior: Behavior::Variable,
        read: |pool, gpu| Ok(f64::from(pool.performance_state(gpu)?)),
    },
    SignalDef {
        name: "GPU_PCIE_RX_THROUGHPUT",
        description: "GPU PCIe receive throughput over a 20 millisecond period",
        units: Units::BytesPerSecond,
        aggregation: Aggregation::Sum,
        behavior: Behavior::Variable,
        read: |pool, gpu| Ok(f64::from(pool.throughput_rx_pcie(gpu)?) * 1024.0),
    },
    SignalDef {
        name: "GPU_PCIE_TX_THROUGHPUT",
        description: "GPU PCIe transmit throughput over a 20 millisecond period",
        units: Units::BytesPerSecond,
        aggregation: Aggregation::Sum,
        behavior: Behavior::Variable,
        read: |pool, gpu| Ok(f64::from(pool.throughput_tx_pcie(gpu)?) * 1024.0),
    },
    SignalDef {
        name: "GPU_UNCORE_UTILIZATION",
        description: "Fraction of time the GPU memory was accessed in the last set of driver samples",
        units: Units::None,
        aggregation: Aggregation::Average,
        behavior: Behavior::Variable,
        read: |pool, gpu| Ok(f64::from(pool.utilization_mem(gpu)?) / 100.0),
    },
];

const SIGNAL_ALIASES: &[(&str, &str)] = &[
    ("GPU_POWER", "GPU_POWER"),
    ("GPU_CORE_FREQUENCY_STATUS", "GPU_CORE_FREQUENCY_STATUS"),
    ("GPU_CORE_FREQUENCY_MIN_AVAIL", "GPU_CORE_FREQUENCY_MIN_AVAIL"),
    ("GPU_CORE_FREQUENCY_MAX_AVAIL", "GPU_CORE_FREQUENCY_MAX_AVAIL"),
    ("GPU_CORE_FREQUENCY_STEP", "GPU_CORE_FREQUENCY_STEP"),
    ("GPU_ENERGY", "GPU_ENERGY_CONSUMPTION_TOTAL"),
    ("GPU_TEMPERATURE", "GPU_TEMPERATURE"),
    ("GPU_UTILIZATION", "GPU_UTILIZATION"),
    ("GPU_POWER_LIMIT_CONTROL", "GPU_POWER_LIMIT_CONTROL"),
    ("GPU_CORE_FREQUENCY_MAX_CONTROL", "GPU_CORE_FREQUENCY_MAX_CONTROL"),
    ("GPU_CORE_FREQUENCY_MIN_CONTROL", "GPU_CORE_FREQUENCY_MIN_CONTROL"),
];

const CONTROL_ALIASES: &[&str] = &[
    "GPU_POWER_LIMIT_CONTROL",
    "GPU_CORE_FREQUENCY_MAX_CONTROL",
    "GPU_CORE_FREQUENCY_MIN_CONTROL",
];

fn check_setting(setting: f64, units: &str) -> Result<f64, HardwareError> {
    if !setting.is_finite() || setting < 0.0 {
        return Err(HardwareError::InvalidArgument(format!(
            "{} {} is not a valid setting",
            setting, units
        )));
    }
    Ok(setting)
}

fn to_mhz(hz: f64) -> Result<u32, HardwareError> {
    Ok((check_setting(hz, "Hz")? / 1e6).round() as u32)
}

fn to_mw(watts: f64) -> Result<u32, HardwareError> {
    Ok((check_setting(watts, "W")? * 1e3).round() as u32)
}

fn prefixed(name: &str) -> String {
    format!("{}{}", PREFIX, name)
}

/// NVIDIA accelerator signals and controls
pub struct NvmlIoGroup {
    registry: BatchRegistry,
    num_gpu: usize,
}

impl NvmlIoGroup {
    pub const NAME: &'static str = "NVML";

    /// Build the signal/control tables for every GPU of `topo`
    ///
    /// Fails if the pool disagrees with the topology on the GPU count or a
    /// GPU reports no supported core frequencies.
    pub fn new(topo: &PlatformTopo, pool: Rc<dyn NvmlDevicePool>) -> Result<Self, PlatformError> {
        let num_gpu = topo.num_domain(Domain::Gpu);
        let pool_gpus = pool.num_gpu()?;
        if pool_gpus != num_gpu {
            return Err(PlatformError::Consistency(format!(
                "NVML reports {} GPUs, topology has {}",
                pool_gpus, num_gpu
            )));
        }

        let mut ranges = Vec::with_capacity(num_gpu);
        for gpu in 0..num_gpu {
            let supported = pool.supported_frequencies_sm(gpu)?;
            let range = FrequencyRange::from_supported(supported).ok_or_else(|| {
                HardwareError::NotSupported(format!(
                    "no supported core frequencies for GPU {}",
                    gpu
                ))
            })?;
            ranges.push(range);
        }
        let requests: RequestCache =
            Rc::new(RefCell::new(ranges.iter().map(|r| (r.min, r.max)).collect()));

        let mut registry = BatchRegistry::new();
        for def in TELEMETRY {
            let sources = (0..num_gpu)
                .map(|gpu| {
                    let pool = Rc::clone(&pool);
                    let read = def.read;
                    Box::new(ClosureSignal::new(move || Ok(read(&*pool, gpu)?)))
                        as Box<dyn SignalSource>
                })
                .collect();
            let info = SignalInfo::new(
                Domain::Gpu,
                def.units,
                def.aggregation,
                def.behavior,
                def.description,
            );
            registry.add_signal(&prefixed(def.name), info, sources)?;
        }

        let constant = |registry: &mut BatchRegistry,
                        name: &str,
                        description: &str,
                        value: fn(&FrequencyRange) -> f64|
         -> Result<(), PlatformError> {
            let sources = ranges
                .iter()
                .map(|range| Box::new(ClosureSignal::constant(value(range))) as Box<dyn SignalSource>)
                .collect();
            let info = SignalInfo::new(
                Domain::Gpu,
                Units::Hertz,
                Aggregation::ExpectSame,
                Behavior::Constant,
                description,
            );
            registry.add_signal(&prefixed(name), info, sources)?;
            Ok(())
        };
        constant(
            &mut registry,
            "GPU_CORE_FREQUENCY_MAX_AVAIL",
            "Streaming multiprocessor maximum frequency",
            |r| r.max,
        )?;
        constant(
            &mut registry,
            "GPU_CORE_FREQUENCY_MIN_AVAIL",
            "Streaming multiprocessor minimum frequency",
            |r| r.min,
        )?;
        constant(
            &mut registry,
            "GPU_CORE_FREQUENCY_STEP",
            "Average streaming multiprocessor frequency step size",
            |r| r.step,
        )?;

        let request_signal = |registry: &mut BatchRegistry,
                              name: &str,
                              description: &str,
                              pick: fn(&(f64, f64)) -> f64|
         -> Result<(), PlatformError> {
            let sources = (0..num_gpu)
                .map(|gpu| {
                    let requests = Rc::clone(&requests);
                    Box::new(ClosureSignal::new(move || Ok(pick(&requests.borrow()[gpu]))))
                        as Box<dyn SignalSource>
                })
                .collect();
            let info = SignalInfo::new(
                Domain::Gpu,
                Units::Hertz,
                Aggregation::ExpectSame,
                Behavior::Variable,
                description,
            );
            registry.add_signal(&prefixed(name), info, sources)?;
            Ok(())
        };
        request_signal(
            &mut registry,
            "GPU_CORE_FREQUENCY_MAX_CONTROL",
            "Latest frequency maximum control request",
            |r| r.1,
        )?;
        request_signal(
            &mut registry,
            "GPU_CORE_FREQUENCY_MIN_CONTROL",
            "Latest frequency minimum control request",
            |r| r.0,
        )?;
        let reset_sources = (0..num_gpu)
            .map(|_| Box::new(ClosureSignal::constant(f64::NAN)) as Box<dyn SignalSource>)
            .collect();
        registry.add_signal(
            &prefixed("GPU_CORE_FREQUENCY_RESET_CONTROL"),
            SignalInfo::new(
                Domain::Gpu,
                Units::None,
                Aggregation::ExpectSame,
                Behavior::Variable,
                "Resets streaming multiprocessor frequency min and max limits to default values",
            ),
            reset_sources,
        )?;

        for name in registry.prune_unreadable_signals() {
            log::debug!("NVML signal {} is not supported", name);
        }
        for (alias, target) in SIGNAL_ALIASES {
            registry.add_signal_alias(alias, &prefixed(target))?;
        }

        if pool.is_privileged_access() {
            add_controls(&mut registry, &pool, &ranges, &requests)?;
            for alias in CONTROL_ALIASES {
                registry.add_control_alias(alias, &prefixed(alias))?;
            }
        } else {
            log::info!("NVML controls unavailable without elevated privileges");
        }

        Ok(Self { registry, num_gpu })
    }
}

fn add_controls(
    registry: &mut BatchRegistry,
    pool: &Rc<dyn NvmlDevicePool>,
    ranges: &[FrequencyRange],
    requests: &RequestCache,
) -> Result<(), PlatformError> {
    let num_gpu = ranges.len();

    let max_sinks = (0..num_gpu)
        .map(|gpu| {
            let (pool, requests, reader) = (Rc::clone(pool), Rc::clone(requests), Rc::clone(requests));
            Box::new(
                ClosureControl::new(move |setting| {
                    let min = requests.borrow()[gpu].0;
                    pool.frequency_control_sm(gpu, to_mhz(min)?, to_mhz(setting)?)?;
                    requests.borrow_mut()[gpu].1 = setting;
                    Ok(())
                })
                .with_read(move || Ok(reader.borrow()[gpu].1)),
            ) as Box<dyn ControlSink>
        })
        .collect();
    let max_ids = registry.add_control(
        &prefixed("GPU_CORE_FREQUENCY_MAX_CONTROL"),
        ControlInfo::new(
            Domain::Gpu,
            Units::Hertz,
            Aggregation::ExpectSame,
            "Sets streaming multiprocessor frequency max",
        ),
        max_sinks,
    )?;

    let min_sinks = (0..num_gpu)
        .map(|gpu| {
            let (pool, requests, reader) = (Rc::clone(pool), Rc::clone(requests), Rc::clone(requests));
            Box::new(
                ClosureControl::new(move |setting| {
                    let max = requests.borrow()[gpu].1;
                    pool.frequency_control_sm(gpu, to_mhz(setting)?, to_mhz(max)?)?;
                    requests.borrow_mut()[gpu].0 = setting;
                    Ok(())
                })
                .with_read(move || Ok(reader.borrow()[gpu].0)),
            ) as Box<dyn ControlSink>
        })
        .collect();
    let min_ids = registry.add_control(
        &prefixed("GPU_CORE_FREQUENCY_MIN_CONTROL"),
        ControlInfo::new(
            Domain::Gpu,
            Units::Hertz,
            Aggregation::ExpectSame,
            "Sets streaming multiprocessor frequency min",
        ),
        min_sinks,
    )?;

    for (&min_id, &max_id) in min_ids.iter().zip(&max_ids) {
        registry.set_write_dependency(
            min_id,
            WriteDependency::new(max_id, Trigger::Always, Requirement::AtLeastSetting),
        )?;
        registry.set_write_dependency(
            max_id,
            WriteDependency::new(min_id, Trigger::Always, Requirement::AtMostSetting),
        )?;
    }

    let reset_sinks = ranges
        .iter()
        .enumerate()
        .map(|(gpu, range)| {
            let (pool, requests, range) = (Rc::clone(pool), Rc::clone(requests), *range);
            Box::new(ClosureControl::new(move |_| {
                pool.frequency_reset_control(gpu)?;
                requests.borrow_mut()[gpu] = (range.min, range.max);
                Ok(())
            })) as Box<dyn ControlSink>
        })
        .collect();
    registry.add_control(
        &prefixed("GPU_CORE_FREQUENCY_RESET_CONTROL"),
        ControlInfo::new(
            Domain::Gpu,
            Units::None,
            Aggregation::Average,
            "Resets streaming multiprocessor frequency min and max limits to default values; the setting is unused",
        ),
        reset_sinks,
    )?;

    let power_sinks = (0..num_gpu)
        .map(|gpu| {
            let (pool, reader) = (Rc::clone(pool), Rc::clone(pool));
            Box::new(
                ClosureControl::new(move |setting| {
                    pool.power_control(gpu, to_mw(setting)?)?;
                    Ok(())
                })
                .with_read(move || Ok(f64::from(reader.power_limit(gpu)?) / 1e3)),
            ) as Box<dyn ControlSink>
        })
        .collect();
    registry.add_control(
        &prefixed("GPU_POWER_LIMIT_CONTROL"),
        ControlInfo::new(Domain::Gpu, Units::Watts, Aggregation::Sum, "Sets GPU power limit"),
        power_sinks,
    )?;
    Ok(())
}

impl IoGroup for NvmlIoGroup {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    fn registry_mut(&mut self) -> &mut BatchRegistry {
        &mut self.registry
    }

    /// Frequency limits are restored with a reset rather than the last
    /// request, followed by the current power limit.
    fn save_settings(&self) -> Result<Vec<ControlSetting>, PlatformError> {
        let reset = prefixed("GPU_CORE_FREQUENCY_RESET_CONTROL");
        let power = prefixed("GPU_POWER_LIMIT_CONTROL");
        if !self.registry.is_valid_control(&reset) {
            return Ok(Vec::new());
        }
        let mut settings = Vec::with_capacity(2 * self.num_gpu);
        for gpu in 0..self.num_gpu {
            settings.push(ControlSetting {
                name: reset.clone(),
                domain: Domain::Gpu,
                domain_idx: gpu,
                setting: 0.0,
            });
            settings.push(ControlSetting {
                name: power.clone(),
                domain: Domain::Gpu,
                domain_idx: gpu,
                setting: self.registry.read_signal(&power, Domain::Gpu, gpu)?,
            });
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iogroup::save::SaveControl;
    use crate::mock::{topo_with_gpus, FakeNvmlPool};

    fn group(pool: &Rc<FakeNvmlPool>) -> NvmlIoGroup {
        let num_gpu = pool.num_gpu().unwrap();
        NvmlIoGroup::new(&topo_with_gpus(num_gpu), pool.clone()).unwrap()
    }

    #[test]
    fn test_signal_unit_conversion() {
        let pool = Rc::new(FakeNvmlPool::new(2));
        pool.update(1, |g| {
            g.power_mw = 123_000;
            g.energy_mj = 2_500;
            g.rx_kbps = 4;
        });
        let nvml = group(&pool);
        let read = |name: &str, gpu| nvml.read_signal(name, Domain::Gpu, gpu).unwrap();

        assert_eq!(read("NVML::GPU_CORE_FREQUENCY_STATUS", 0), 1410e6);
        assert_eq!(read("NVML::GPU_UTILIZATION", 0), 0.75);
        assert_eq!(read("NVML::GPU_UNCORE_UTILIZATION", 0), 0.4);
        assert_eq!(read("GPU_POWER", 1), 123.0);
        assert_eq!(read("GPU_ENERGY", 1), 2.5);
        assert_eq!(read("NVML::GPU_PCIE_RX_THROUGHPUT", 1), 4096.0);
        assert_eq!(read("NVML::GPU_POWER_LIMIT_CONTROL", 0), 250.0);
        assert_eq!(read("NVML::GPU_CORE_THROTTLE_REASONS", 0), 4.0);
    }

    #[test]
    fn test_frequency_range_signals() {
        let pool = Rc::new(FakeNvmlPool::new(1));
        let nvml = group(&pool);
        let read = |name: &str| nvml.read_signal(name, Domain::Gpu, 0).unwrap();
        assert_eq!(read("GPU_CORE_FREQUENCY_MIN_AVAIL"), 300e6);
        assert_eq!(read("GPU_CORE_FREQUENCY_MAX_AVAIL"), 1500e6);
        assert_eq!(read("GPU_CORE_FREQUENCY_STEP"), 600e6);
        assert_eq!(
            nvml.signal_behavior("GPU_CORE_FREQUENCY_STEP").unwrap(),
            Behavior::Constant
        );
        assert!(read("NVML::GPU_CORE_FREQUENCY_RESET_CONTROL").is_nan());
    }

    #[test]
    fn test_single_supported_frequency_has_no_step() {
        let pool = Rc::new(FakeNvmlPool::new(1).with_supported_frequencies(vec![1200]));
        let nvml = group(&pool);
        assert!(nvml
            .read_signal("GPU_CORE_FREQUENCY_STEP", Domain::Gpu, 0)
            .unwrap()
            .is_nan());
    }

    #[test]
    fn test_empty_supported_frequencies_abort_construction() {
        let pool = Rc::new(FakeNvmlPool::new(1).with_supported_frequencies(vec![]));
        let result = NvmlIoGroup::new(&topo_with_gpus(1), pool);
        assert!(matches!(
            result,
            Err(PlatformError::Hardware(HardwareError::NotSupported(_)))
        ));
    }

    #[test]
    fn test_gpu_count_mismatch_is_consistency_error() {
        let pool = Rc::new(FakeNvmlPool::new(2).with_reported_count(3));
        let err = NvmlIoGroup::new(&topo_with_gpus(2), pool).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Consistency);
    }

    #[test]
    fn test_unsupported_signal_is_pruned_with_its_alias() {
        let pool = Rc::new(FakeNvmlPool::new(1).with_unsupported("temperature"));
        let nvml = group(&pool);
        assert!(!nvml.is_valid_signal("NVML::GPU_TEMPERATURE"));
        assert!(!nvml.is_valid_signal("GPU_TEMPERATURE"));
        assert!(nvml.is_valid_signal("GPU_POWER"));
    }

    #[test]
    fn test_aliases_share_objects() {
        let pool = Rc::new(FakeNvmlPool::new(2));
        let nvml = group(&pool);
        for (alias, target) in SIGNAL_ALIASES {
            assert_eq!(
                nvml.registry().signal_objects(alias),
                nvml.registry().signal_objects(&prefixed(target)),
                "{}",
                alias
            );
        }
        for alias in CONTROL_ALIASES {
            assert_eq!(
                nvml.registry().control_objects(alias),
                nvml.registry().control_objects(&prefixed(alias))
            );
        }
    }

    #[test]
    fn test_frequency_controls_carry_opposite_request() {
        let pool = Rc::new(FakeNvmlPool::new(1));
        let mut nvml = group(&pool);
        nvml.write_control("GPU_CORE_FREQUENCY_MAX_CONTROL", Domain::Gpu, 0, 900e6)
            .unwrap();
        assert_eq!(pool.gpu(0).locked_mhz, Some((300, 900)));
        nvml.write_control("NVML::GPU_CORE_FREQUENCY_MIN_CONTROL", Domain::Gpu, 0, 600e6)
            .unwrap();
        assert_eq!(pool.gpu(0).locked_mhz, Some((600, 900)));
        assert_eq!(
            nvml.read_signal("GPU_CORE_FREQUENCY_MIN_CONTROL", Domain::Gpu, 0)
                .unwrap(),
            600e6
        );

        nvml.write_control("NVML::GPU_CORE_FREQUENCY_RESET_CONTROL", Domain::Gpu, 0, 0.0)
            .unwrap();
        assert_eq!(pool.gpu(0).locked_mhz, None);
        assert_eq!(pool.gpu(0).resets, 1);
        assert_eq!(
            nvml.read_signal("GPU_CORE_FREQUENCY_MAX_CONTROL", Domain::Gpu, 0)
                .unwrap(),
            1500e6
        );
    }

    #[test]
    fn test_batched_frequency_window_in_either_direction() {
        let pool = Rc::new(FakeNvmlPool::new(1));
        let mut nvml = group(&pool);
        let max = nvml
            .push_control("GPU_CORE_FREQUENCY_MAX_CONTROL", Domain::Gpu, 0)
            .unwrap();
        let min = nvml
            .push_control("GPU_CORE_FREQUENCY_MIN_CONTROL", Domain::Gpu, 0)
            .unwrap();

        nvml.adjust(max, 600e6).unwrap();
        nvml.adjust(min, 450e6).unwrap();
        nvml.write_batch().unwrap();
        assert_eq!(pool.gpu(0).locked_mhz, Some((450, 600)));

        // raising min above the current max needs max written first
        nvml.adjust(min, 1200e6).unwrap();
        nvml.adjust(max, 1500e6).unwrap();
        nvml.write_batch().unwrap();
        assert_eq!(pool.gpu(0).locked_mhz, Some((1200, 1500)));
    }

    #[test]
    fn test_power_limit_control() {
        let pool = Rc::new(FakeNvmlPool::new(2));
        let mut nvml = group(&pool);
        let handle = nvml
            .push_control("GPU_POWER_LIMIT_CONTROL", Domain::Gpu, 1)
            .unwrap();
        nvml.adjust(handle, 200.0).unwrap();
        nvml.write_batch().unwrap();
        assert_eq!(pool.gpu(1).power_limit_mw, 200_000);
        assert_eq!(pool.gpu(0).power_limit_mw, 250_000);
    }

    #[test]
    fn test_non_finite_settings_never_reach_driver() {
        let pool = Rc::new(FakeNvmlPool::new(1));
        let mut nvml = group(&pool);
        let err = nvml
            .write_control("GPU_POWER_LIMIT_CONTROL", Domain::Gpu, 0, f64::NAN)
            .unwrap_err();
        assert!(matches!(
            err,
            PlatformError::Hardware(HardwareError::InvalidArgument(_))
        ));
        assert!(nvml
            .write_control("GPU_POWER_LIMIT_CONTROL", Domain::Gpu, 0, -5.0)
            .is_err());
        assert_eq!(pool.gpu(0).power_limit_mw, 250_000);

        assert!(nvml
            .write_control("GPU_CORE_FREQUENCY_MAX_CONTROL", Domain::Gpu, 0, f64::INFINITY)
            .is_err());
        assert_eq!(pool.gpu(0).locked_mhz, None);
        assert!(matches!(to_mhz(f64::NAN), Err(HardwareError::InvalidArgument(_))));
        assert_eq!(to_mhz(1410e6).unwrap(), 1410);
    }

    #[test]
    fn test_unprivileged_has_no_controls() {
        let pool = Rc::new(FakeNvmlPool::new(1).unprivileged());
        let nvml = group(&pool);
        assert!(nvml.control_names().is_empty());
        assert!(nvml.is_valid_signal("GPU_POWER_LIMIT_CONTROL"));
        assert!(nvml.save_settings().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_restore_settings() {
        let pool = Rc::new(FakeNvmlPool::new(2));
        let mut nvml = group(&pool);
        let snapshot = SaveControl::new(nvml.save_settings().unwrap());
        let names: Vec<&str> = snapshot.settings().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "NVML::GPU_CORE_FREQUENCY_RESET_CONTROL",
                "NVML::GPU_POWER_LIMIT_CONTROL",
                "NVML::GPU_CORE_FREQUENCY_RESET_CONTROL",
                "NVML::GPU_POWER_LIMIT_CONTROL",
            ]
        );
        assert_eq!(snapshot.settings()[1].setting, 250.0);

        nvml.write_control("GPU_POWER_LIMIT_CONTROL", Domain::Gpu, 0, 180.0)
            .unwrap();
        nvml.write_control("GPU_CORE_FREQUENCY_MAX_CONTROL", Domain::Gpu, 0, 900e6)
            .unwrap();
        let target: &mut dyn IoGroup = &mut nvml;
        snapshot.restore(target).unwrap();
        assert_eq!(pool.gpu(0).power_limit_mw, 250_000);
        assert_eq!(pool.gpu(0).locked_mhz, None);
        assert_eq!(pool.gpu(1).resets, 1);
    }
}
