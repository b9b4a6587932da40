//! Intel GPU IoGroup
//!
//! Per-chip compute frequency telemetry and limits. Chip indices follow the
//! topology's GPU-major numbering and are split into `(gpu, subdevice)`
//! before reaching the pool.

use crate::error::{HardwareError, PlatformError};
use crate::iogroup::object::{
    ClosureControl, ClosureSignal, ControlSink, Requirement, SignalSource, Trigger, WriteDependency,
};
use crate::iogroup::{Aggregation, BatchRegistry, Behavior, ControlInfo, IoGroup, SignalInfo, Units};
use crate::levelzero::traits::LevelZeroDevicePool;
use crate::topo::{Domain, PlatformTopo};

use std::rc::Rc;

const PREFIX: &str = "LEVELZERO::";

type Reading = fn(&dyn LevelZeroDevicePool, usize, usize) -> Result<f64, HardwareError>;

/// Name, behavior, description, pool reading in MHz
const SIGNALS: &[(&str, Behavior, &str, Reading)] = &[
    (
        "GPU_CORE_FREQUENCY_STATUS",
        Behavior::Variable,
        "Current compute frequency of the chip",
        |pool, gpu, sub| pool.frequency_status(gpu, sub),
    ),
    (
        "GPU_CORE_FREQUENCY_EFFICIENT",
        Behavior::Constant,
        "Most energy efficient compute frequency of the chip",
        |pool, gpu, sub| pool.frequency_efficient(gpu, sub),
    ),
    (
        "GPU_CORE_FREQUENCY_MIN_AVAIL",
        Behavior::Constant,
        "Minimum compute frequency the chip supports",
        |pool, gpu, sub| pool.frequency_min(gpu, sub),
    ),
    (
        "GPU_CORE_FREQUENCY_MAX_AVAIL",
        Behavior::Constant,
        "Maximum compute frequency the chip supports",
        |pool, gpu, sub| pool.frequency_max(gpu, sub),
    ),
    (
        "GPU_CORE_FREQUENCY_MIN_CONTROL",
        Behavior::Variable,
        "Current lower limit of the compute frequency request",
        |pool, gpu, sub| Ok(pool.frequency_range(gpu, sub)?.0),
    ),
    (
        "GPU_CORE_FREQUENCY_MAX_CONTROL",
        Behavior::Variable,
        "Current upper limit of the compute frequency request",
        |pool, gpu, sub| Ok(pool.frequency_range(gpu, sub)?.1),
    ),
];

const ALIASES: &[&str] = &[
    "GPU_CORE_FREQUENCY_STATUS",
    "GPU_CORE_FREQUENCY_MIN_AVAIL",
    "GPU_CORE_FREQUENCY_MAX_AVAIL",
    "GPU_CORE_FREQUENCY_MIN_CONTROL",
    "GPU_CORE_FREQUENCY_MAX_CONTROL",
];

fn prefixed(name: &str) -> String {
    format!("{}{}", PREFIX, name)
}

fn to_mhz(hz: f64) -> Result<f64, HardwareError> {
    if !hz.is_finite() || hz < 0.0 {
        return Err(HardwareError::InvalidArgument(format!(
            "{} Hz is not a valid frequency",
            hz
        )));
    }
    Ok(hz / 1e6)
}

/// Which end of the frequency window a control moves
#[derive(Clone, Copy)]
enum Bound {
    Min,
    Max,
}

fn bound_sink(
    pool: &Rc<dyn LevelZeroDevicePool>,
    gpu: usize,
    sub: usize,
    bound: Bound,
) -> Box<dyn ControlSink> {
    let (pool, reader) = (Rc::clone(pool), Rc::clone(pool));
    Box::new(
        ClosureControl::new(move |setting| {
            let mhz = to_mhz(setting)?;
            let (min, max) = pool.frequency_range(gpu, sub)?;
            match bound {
                Bound::Min => pool.frequency_control(gpu, sub, mhz, max)?,
                Bound::Max => pool.frequency_control(gpu, sub, min, mhz)?,
            }
            Ok(())
        })
        .with_read(move || {
            let (min, max) = reader.frequency_range(gpu, sub)?;
            let mhz = match bound {
                Bound::Min => min,
                Bound::Max => max,
            };
            Ok(mhz * 1e6)
        }),
    )
}

/// Intel accelerator chip signals and controls
pub struct LevelZeroIoGroup {
    registry: BatchRegistry,
}

impl LevelZeroIoGroup {
    pub const NAME: &'static str = "LEVELZERO";

    /// Build the tables for every GPU chip of `topo`
    ///
    /// Fails if the pool and the topology disagree on GPU or chip counts.
    pub fn new(topo: &PlatformTopo, pool: Rc<dyn LevelZeroDevicePool>) -> Result<Self, PlatformError> {
        let (num_gpu, num_chip) = (topo.num_domain(Domain::Gpu), topo.num_domain(Domain::GpuChip));
        let (pool_gpus, pool_chips) = (pool.num_gpu()?, pool.num_gpu_chip()?);
        if pool_gpus != num_gpu || pool_chips != num_chip {
            return Err(PlatformError::Consistency(format!(
                "Intel GPU pool reports {} GPUs with {} chips, topology has {} with {}",
                pool_gpus, pool_chips, num_gpu, num_chip
            )));
        }
        if num_chip == 0 {
            return Err(HardwareError::NotSupported("no Intel GPU chips".to_string()).into());
        }
        let chips = (0..num_chip)
            .map(|chip| topo.gpu_chip_to_gpu(chip))
            .collect::<Result<Vec<_>, _>>()?;

        let mut registry = BatchRegistry::new();
        for &(name, behavior, description, read) in SIGNALS {
            let sources = chips
                .iter()
                .map(|&(gpu, sub)| {
                    let pool = Rc::clone(&pool);
                    Box::new(ClosureSignal::new(move || Ok(read(&*pool, gpu, sub)? * 1e6)))
                        as Box<dyn SignalSource>
                })
                .collect();
            let aggregation = match behavior {
                Behavior::Constant => Aggregation::ExpectSame,
                _ => Aggregation::Average,
            };
            let info = SignalInfo::new(Domain::GpuChip, Units::Hertz, aggregation, behavior, description);
            registry.add_signal(&prefixed(name), info, sources)?;
        }
        for name in registry.prune_unreadable_signals() {
            log::debug!("Intel GPU signal {} is not supported", name);
        }

        let mut ids = Vec::with_capacity(2);
        for (name, bound, description) in [
            (
                "GPU_CORE_FREQUENCY_MIN_CONTROL",
                Bound::Min,
                "Sets the lower limit of the chip compute frequency",
            ),
            (
                "GPU_CORE_FREQUENCY_MAX_CONTROL",
                Bound::Max,
                "Sets the upper limit of the chip compute frequency",
            ),
        ] {
            let sinks = chips
                .iter()
                .map(|&(gpu, sub)| bound_sink(&pool, gpu, sub, bound))
                .collect();
            let info = ControlInfo::new(Domain::GpuChip, Units::Hertz, Aggregation::ExpectSame, description);
            ids.push(registry.add_control(&prefixed(name), info, sinks)?);
        }
        for (&min_id, &max_id) in ids[0].iter().zip(&ids[1]) {
            registry.set_write_dependency(
                min_id,
                WriteDependency::new(max_id, Trigger::Always, Requirement::AtLeastSetting),
            )?;
            registry.set_write_dependency(
                max_id,
                WriteDependency::new(min_id, Trigger::Always, Requirement::AtMostSetting),
            )?;
        }

        for alias in ALIASES {
            registry.add_signal_alias(alias, &prefixed(alias))?;
            registry.add_control_alias(alias, &prefixed(alias))?;
        }
        Ok(Self { registry })
    }
}

impl IoGroup for LevelZeroIoGroup {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    fn registry_mut(&mut self) -> &mut BatchRegistry {
        &mut self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iogroup::PlatformIo;
    use crate::mock::{topo_with_gpu_chips, FakeLevelZeroPool};

    fn group(pool: &Rc<FakeLevelZeroPool>) -> LevelZeroIoGroup {
        let topo = topo_with_gpu_chips(2, 2);
        LevelZeroIoGroup::new(&topo, pool.clone()).unwrap()
    }

    #[test]
    fn test_chip_index_maps_to_gpu_and_subdevice() {
        let pool = Rc::new(FakeLevelZeroPool::new(2, 2));
        pool.update(1, 0, |c| c.status = 1250.0);
        let l0 = group(&pool);
        assert_eq!(l0.signal_domain_type("GPU_CORE_FREQUENCY_STATUS"), Some(Domain::GpuChip));
        assert_eq!(
            l0.read_signal("GPU_CORE_FREQUENCY_STATUS", Domain::GpuChip, 2)
                .unwrap(),
            1250e6
        );
        assert_eq!(
            l0.read_signal("LEVELZERO::GPU_CORE_FREQUENCY_STATUS", Domain::GpuChip, 1)
                .unwrap(),
            1100e6
        );
        assert!(l0
            .read_signal("GPU_CORE_FREQUENCY_STATUS", Domain::GpuChip, 4)
            .is_err());
    }

    #[test]
    fn test_frequency_window_controls() {
        let pool = Rc::new(FakeLevelZeroPool::new(2, 2));
        let mut l0 = group(&pool);
        let max = l0
            .push_control("GPU_CORE_FREQUENCY_MAX_CONTROL", Domain::GpuChip, 3)
            .unwrap();
        l0.adjust(max, 900e6).unwrap();
        l0.write_batch().unwrap();
        assert_eq!(pool.chip(1, 1).range, (300.0, 900.0));
        assert_eq!(pool.chip(1, 0).range, (300.0, 1600.0));

        // minimum above the current maximum is a precondition failure
        let err = l0
            .write_control("GPU_CORE_FREQUENCY_MIN_CONTROL", Domain::GpuChip, 3, 1200e6)
            .unwrap_err();
        assert!(matches!(
            err,
            PlatformError::Hardware(HardwareError::PreconditionUnmet(_))
        ));
        assert_eq!(pool.controls(), vec![(1, 1, 300.0, 900.0)]);
    }

    #[test]
    fn test_non_finite_limit_rejected() {
        let pool = Rc::new(FakeLevelZeroPool::new(2, 2));
        let mut l0 = group(&pool);
        assert!(l0
            .write_control("GPU_CORE_FREQUENCY_MAX_CONTROL", Domain::GpuChip, 0, f64::NAN)
            .is_err());
        assert!(pool.controls().is_empty());
    }

    #[test]
    fn test_count_mismatch_is_consistency_error() {
        let pool = Rc::new(FakeLevelZeroPool::new(2, 1));
        let err = LevelZeroIoGroup::new(&topo_with_gpu_chips(2, 2), pool).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Consistency);
    }

    #[test]
    fn test_gpu_domain_read_aggregates_chips() {
        let pool = Rc::new(FakeLevelZeroPool::new(2, 2));
        pool.update(0, 0, |c| c.status = 1000.0);
        pool.update(0, 1, |c| c.status = 1200.0);
        let topo = topo_with_gpu_chips(2, 2);
        let group: Box<dyn IoGroup> = Box::new(LevelZeroIoGroup::new(&topo, pool.clone()).unwrap());
        let mut platform = PlatformIo::new(topo, vec![group]);
        assert_eq!(
            platform
                .read_signal("GPU_CORE_FREQUENCY_STATUS", Domain::Gpu, 0)
                .unwrap(),
            1100e6
        );

        platform
            .write_control("GPU_CORE_FREQUENCY_MAX_CONTROL", Domain::Gpu, 1, 1000e6)
            .unwrap();
        assert_eq!(pool.chip(1, 0).range, (300.0, 1000.0));
        assert_eq!(pool.chip(1, 1).range, (300.0, 1000.0));
        assert_eq!(pool.chip(0, 0).range, (300.0, 1600.0));
    }
}
