//! Platform composition for the CLI
//!
//! Detects the topology and loads every enabled backend that works on this
//! machine.

use crate::config::Config;
use crate::cpufreq::CpufreqIoGroup;
use crate::error::{AppError, Result};
use crate::iogroup::{IoGroup, IoGroupFactory, PlatformIo};
use crate::levelzero::{DrmPool, LevelZeroDevicePool, LevelZeroIoGroup};
use crate::nvml::{NvmlDevicePool, NvmlIoGroup, NvmlPool};
use crate::sst::{IsstDevice, SstIo, SstIoGroup};
use crate::topo::sysfs::detect_cpu_layout;
use crate::topo::{PlatformTopo, TopoCounts};

use std::rc::Rc;

/// Accelerator pools opened before the topology is built
#[derive(Default, Clone)]
pub struct GpuPools {
    pub nvml: Option<Rc<dyn NvmlDevicePool>>,
    pub levelzero: Option<Rc<dyn LevelZeroDevicePool>>,
}

impl GpuPools {
    /// Open every enabled pool whose driver is present
    pub fn open(config: &Config) -> Self {
        let nvml = config.backends.nvml.then(NvmlPool::new).and_then(|pool| match pool {
            Ok(pool) => Some(Rc::new(pool) as Rc<dyn NvmlDevicePool>),
            Err(e) => {
                log::warn!("NVML unavailable: {}", e);
                None
            }
        });
        let levelzero = config
            .backends
            .levelzero
            .then(|| DrmPool::with_root(&config.backends.drm_root))
            .and_then(|pool| match pool {
                Ok(pool) => Some(Rc::new(pool) as Rc<dyn LevelZeroDevicePool>),
                Err(e) => {
                    log::warn!("Intel GPUs unavailable: {}", e);
                    None
                }
            });
        Self { nvml, levelzero }
    }
}

/// Topology from the static config section, falling back to sysfs detection
/// for CPUs and to the GPU pools for accelerators
pub fn build_topo(config: &Config, pools: &GpuPools) -> Result<PlatformTopo> {
    let (counts, cpus) = match config.topology.cpu_counts() {
        Some(counts) => (counts, None),
        None => {
            let layout = detect_cpu_layout(&config.backends.cpu_root)?;
            (layout.counts, Some(layout.cpus))
        }
    };
    let num_gpu = match (config.topology.gpus, &pools.nvml, &pools.levelzero) {
        (Some(n), _, _) => n,
        (None, Some(pool), _) => pool.num_gpu()?,
        (None, None, Some(pool)) => pool.num_gpu()?,
        (None, None, None) => 0,
    };
    let num_gpu_chip = match (config.topology.gpu_chips, &pools.levelzero) {
        (Some(n), _) => n,
        (None, Some(pool)) if pool.num_gpu()? == num_gpu => pool.num_gpu_chip()?,
        _ => 0,
    };
    let counts = TopoCounts {
        num_gpu,
        num_gpu_chip,
        ..counts
    };
    let topo = match cpus {
        Some(cpus) => PlatformTopo::with_cpu_layout(counts, cpus)?,
        None => PlatformTopo::new(counts)?,
    };
    Ok(topo)
}

/// Factory with a constructor for every enabled backend
pub fn build_factory(config: &Config, topo: &PlatformTopo, pools: GpuPools) -> IoGroupFactory {
    let mut factory = IoGroupFactory::new();

    if let Some(pool) = pools.nvml {
        let topo = topo.clone();
        factory.register(NvmlIoGroup::NAME, move || {
            Ok(Box::new(NvmlIoGroup::new(&topo, Rc::clone(&pool))?) as Box<dyn IoGroup>)
        });
    }

    if let Some(pool) = pools.levelzero {
        let topo = topo.clone();
        factory.register(LevelZeroIoGroup::NAME, move || {
            Ok(Box::new(LevelZeroIoGroup::new(&topo, Rc::clone(&pool))?) as Box<dyn IoGroup>)
        });
    }

    if config.backends.sst {
        let topo = topo.clone();
        factory.register(SstIoGroup::NAME, move || {
            let device: Rc<dyn SstIo> = Rc::new(IsstDevice::open()?);
            Ok(Box::new(SstIoGroup::new(&topo, device)?) as Box<dyn IoGroup>)
        });
    }

    if config.backends.cpufreq {
        let topo = topo.clone();
        let root = config.backends.cpu_root.clone();
        factory.register(CpufreqIoGroup::NAME, move || {
            Ok(Box::new(CpufreqIoGroup::with_root(&topo, &root)?) as Box<dyn IoGroup>)
        });
    }

    factory
}

/// Detect the machine and load every backend that works on it
pub fn open_platform(config: &Config) -> Result<PlatformIo> {
    let pools = GpuPools::open(config);
    let topo = build_topo(config, &pools)?;
    let factory = build_factory(config, &topo, pools);
    let groups = factory.load();
    if groups.is_empty() {
        return Err(AppError::NoBackends);
    }
    log::debug!(
        "Loaded backends: {}",
        groups.iter().map(|g| g.name()).collect::<Vec<_>>().join(", ")
    );
    Ok(PlatformIo::new(topo, groups))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::mock::{cpufreq_tree, cpufreq_tree_with, FakeLevelZeroPool, FakeNvmlPool};
    use crate::topo::Domain;

    fn nvml_pools(num_gpu: usize) -> GpuPools {
        GpuPools {
            nvml: Some(Rc::new(FakeNvmlPool::new(num_gpu)) as Rc<dyn NvmlDevicePool>),
            levelzero: None,
        }
    }

    #[test]
    fn test_topo_from_sysfs_and_pool() {
        let tree = cpufreq_tree(4, 1_000_000, 3_700_000);
        let config = ConfigBuilder::new()
            .with_cpu_root(Some(tree.path().to_path_buf()))
            .build();
        let topo = build_topo(&config, &nvml_pools(2)).unwrap();
        assert_eq!(topo.num_domain(Domain::Core), 4);
        assert_eq!(topo.num_domain(Domain::Gpu), 2);
        assert_eq!(topo.num_domain(Domain::GpuChip), 0);
    }

    #[test]
    fn test_detected_siblings_reach_topology() {
        let tree = cpufreq_tree_with(
            &[(0, 0, 0), (1, 0, 0), (2, 0, 1), (3, 0, 1)],
            1_000_000,
            3_700_000,
        );
        let config = ConfigBuilder::new()
            .with_cpu_root(Some(tree.path().to_path_buf()))
            .build();
        let topo = build_topo(&config, &GpuPools::default()).unwrap();
        assert_eq!(topo.num_domain(Domain::Core), 2);
        let core0 = topo.domain_nested(Domain::Cpu, Domain::Core, 0).unwrap();
        assert_eq!(core0.into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_gpu_chips_from_levelzero_pool() {
        let tree = cpufreq_tree(2, 1_000_000, 3_700_000);
        let config = ConfigBuilder::new()
            .with_cpu_root(Some(tree.path().to_path_buf()))
            .with_backends(Some(["levelzero".to_string()].as_slice()))
            .build();
        let pools = GpuPools {
            nvml: None,
            levelzero: Some(Rc::new(FakeLevelZeroPool::new(2, 2)) as Rc<dyn LevelZeroDevicePool>),
        };
        let topo = build_topo(&config, &pools).unwrap();
        assert_eq!(topo.num_domain(Domain::Gpu), 2);
        assert_eq!(topo.num_domain(Domain::GpuChip), 4);
        assert_eq!(topo.gpu_chip_to_gpu(3).unwrap(), (1, 1));

        let factory = build_factory(&config, &topo, pools);
        assert_eq!(factory.names(), vec!["LEVELZERO"]);
        let platform = PlatformIo::new(topo, factory.load());
        assert_eq!(
            platform.signal_domain_type("GPU_CORE_FREQUENCY_STATUS").unwrap(),
            Domain::GpuChip
        );
    }

    #[test]
    fn test_static_topology_wins() {
        let mut config = Config::default();
        config.topology.packages = Some(2);
        config.topology.cores_per_package = Some(4);
        config.topology.threads_per_core = Some(2);
        config.topology.gpus = Some(1);
        let topo = build_topo(&config, &GpuPools::default()).unwrap();
        assert_eq!(topo.num_domain(Domain::Cpu), 16);
        assert_eq!(topo.num_domain(Domain::Gpu), 1);
    }

    #[test]
    fn test_factory_loads_working_backends() {
        let tree = cpufreq_tree(2, 1_000_000, 3_700_000);
        let config = ConfigBuilder::new()
            .with_cpu_root(Some(tree.path().to_path_buf()))
            .with_backends(Some(["nvml".to_string(), "cpufreq".to_string()].as_slice()))
            .build();
        let pools = nvml_pools(1);
        let topo = build_topo(&config, &pools).unwrap();
        let factory = build_factory(&config, &topo, pools);
        assert_eq!(factory.names(), vec!["NVML", "CPUFREQ"]);

        let platform = PlatformIo::new(topo, factory.load());
        assert_eq!(platform.group_names(), vec!["NVML", "CPUFREQ"]);
        assert!(platform.is_valid_signal("GPU_POWER"));
        assert!(platform.is_valid_control("CPU_FREQUENCY_MAX_CONTROL"));
    }
}
