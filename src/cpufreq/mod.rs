//! Linux cpufreq IoGroup
//!
//! Reads and limits core frequency through
//! `/sys/devices/system/cpu/cpu<N>/cpufreq/`. Attributes are in kHz.

use crate::error::{HardwareError, PlatformError};
use crate::iogroup::object::{
    ClosureControl, ClosureSignal, ControlSink, Requirement, SignalSource, Trigger, WriteDependency,
};
use crate::iogroup::{Aggregation, BatchRegistry, Behavior, ControlInfo, IoGroup, SignalInfo, Units};
use crate::topo::{sysfs::DEFAULT_CPU_ROOT, Domain, PlatformTopo};

use std::path::{Path, PathBuf};

const PREFIX: &str = "CPUFREQ::";

/// Sysfs attribute, alias, behavior, description
const SIGNALS: &[(&str, &str, Behavior, &str)] = &[
    (
        "scaling_cur_freq",
        "CPU_FREQUENCY_STATUS",
        Behavior::Variable,
        "Current operating frequency of the core",
    ),
    (
        "cpuinfo_min_freq",
        "CPU_FREQUENCY_MIN_AVAIL",
        Behavior::Constant,
        "Minimum frequency the core supports",
    ),
    (
        "cpuinfo_max_freq",
        "CPU_FREQUENCY_MAX_AVAIL",
        Behavior::Constant,
        "Maximum frequency the core supports",
    ),
    (
        "scaling_min_freq",
        "CPU_FREQUENCY_MIN_CONTROL",
        Behavior::Variable,
        "Lower frequency limit of the scaling governor",
    ),
    (
        "scaling_max_freq",
        "CPU_FREQUENCY_MAX_CONTROL",
        Behavior::Variable,
        "Upper frequency limit of the scaling governor",
    ),
];

fn read_hz(path: &Path) -> Result<f64, HardwareError> {
    let content = std::fs::read_to_string(path).map_err(|source| HardwareError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let khz: u64 = content.trim().parse().map_err(|_| HardwareError::Malformed {
        path: path.display().to_string(),
        value: content.trim().to_string(),
    })?;
    Ok(khz as f64 * 1e3)
}

fn write_hz(path: &Path, hz: f64) -> Result<(), HardwareError> {
    if !hz.is_finite() || hz < 0.0 {
        return Err(HardwareError::InvalidArgument(format!(
            "{}: {} Hz is not a valid frequency",
            path.display(),
            hz
        )));
    }
    let khz = (hz / 1e3).round() as u64;
    std::fs::write(path, khz.to_string()).map_err(|source| match source.kind() {
        std::io::ErrorKind::PermissionDenied => {
            HardwareError::InsufficientPermissions(path.display().to_string())
        }
        _ => HardwareError::Io {
            path: path.display().to_string(),
            source,
        },
    })
}

fn signal_name(attribute: &str) -> String {
    format!("{}{}", PREFIX, attribute.to_uppercase())
}

/// Per-core frequency signals and limits from cpufreq
pub struct CpufreqIoGroup {
    registry: BatchRegistry,
}

impl CpufreqIoGroup {
    pub const NAME: &'static str = "CPUFREQ";

    /// Tables for the default sysfs root
    pub fn new(topo: &PlatformTopo) -> Result<Self, PlatformError> {
        Self::with_root(topo, DEFAULT_CPU_ROOT)
    }

    /// Tables for the cpufreq tree under `root`
    ///
    /// Attributes that cannot be read are dropped; the group fails to load
    /// when `cpuinfo_max_freq` is among them.
    pub fn with_root(topo: &PlatformTopo, root: impl AsRef<Path>) -> Result<Self, PlatformError> {
        let root = root.as_ref();
        let num_core = topo.num_domain(Domain::Core);
        let mut core_cpus: Vec<(PathBuf, Vec<PathBuf>)> = Vec::with_capacity(num_core);
        for core in 0..num_core {
            let first = root.join(format!("cpu{}/cpufreq", topo.first_cpu(Domain::Core, core)?));
            let nested = topo
                .native_cpus(Domain::Core, core)?
                .into_iter()
                .map(|cpu| root.join(format!("cpu{}/cpufreq", cpu)))
                .collect();
            core_cpus.push((first, nested));
        }

        let mut registry = BatchRegistry::new();
        for &(attribute, _, behavior, description) in SIGNALS {
            let sources = core_cpus
                .iter()
                .map(|(first, _)| {
                    let path = first.join(attribute);
                    Box::new(ClosureSignal::new(move || Ok(read_hz(&path)?))) as Box<dyn SignalSource>
                })
                .collect();
            let info = SignalInfo::new(
                Domain::Core,
                Units::Hertz,
                Aggregation::Average,
                behavior,
                description,
            );
            registry.add_signal(&signal_name(attribute), info, sources)?;
        }
        for name in registry.prune_unreadable_signals() {
            log::debug!("cpufreq attribute {} is not readable", name);
        }
        if !registry.is_valid_signal(&signal_name("cpuinfo_max_freq")) {
            return Err(HardwareError::NotSupported(format!(
                "cpufreq not available under {}",
                root.display()
            ))
            .into());
        }
        for &(attribute, alias, _, _) in SIGNALS {
            registry.add_signal_alias(alias, &signal_name(attribute))?;
        }

        let mut limit_ids = Vec::new();
        for (attribute, alias, description) in [
            (
                "scaling_min_freq",
                "CPU_FREQUENCY_MIN_CONTROL",
                "Lower frequency limit of every CPU in the core",
            ),
            (
                "scaling_max_freq",
                "CPU_FREQUENCY_MAX_CONTROL",
                "Upper frequency limit of every CPU in the core",
            ),
        ] {
            let sinks = core_cpus
                .iter()
                .map(|(first, nested)| {
                    let targets: Vec<PathBuf> = nested.iter().map(|dir| dir.join(attribute)).collect();
                    let readback = first.join(attribute);
                    Box::new(
                        ClosureControl::new(move |setting| {
                            for path in &targets {
                                write_hz(path, setting)?;
                            }
                            Ok(())
                        })
                        .with_read(move || Ok(read_hz(&readback)?)),
                    ) as Box<dyn ControlSink>
                })
                .collect();
            let info = ControlInfo::new(Domain::Core, Units::Hertz, Aggregation::Average, description);
            let name = signal_name(attribute);
            limit_ids.push(registry.add_control(&name, info, sinks)?);
            registry.add_control_alias(alias, &name)?;
        }
        for (&min_id, &max_id) in limit_ids[0].iter().zip(&limit_ids[1]) {
            registry.set_write_dependency(
                min_id,
                WriteDependency::new(max_id, Trigger::Always, Requirement::AtLeastSetting),
            )?;
            registry.set_write_dependency(
                max_id,
                WriteDependency::new(min_id, Trigger::Always, Requirement::AtMostSetting),
            )?;
        }

        Ok(Self { registry })
    }
}

impl IoGroup for CpufreqIoGroup {
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
    use crate::iogroup::save::SaveControl;
    use crate::mock::{cpu_topo, cpufreq_tree, cpufreq_tree_with};
    use crate::topo::PlatformTopo;
    use std::fs;

    fn read_khz(root: &Path, cpu: usize, attribute: &str) -> String {
        fs::read_to_string(root.join(format!("cpu{}/cpufreq/{}", cpu, attribute)))
            .unwrap()
            .trim()
            .to_string()
    }

    #[test]
    fn test_signals_in_hertz() {
        let tree = cpufreq_tree(4, 1_000_000, 3_700_000);
        let group = CpufreqIoGroup::with_root(&cpu_topo(1, 4, 1), tree.path()).unwrap();
        assert_eq!(
            group
                .read_signal("CPU_FREQUENCY_MAX_AVAIL", Domain::Core, 2)
                .unwrap(),
            3.7e9
        );
        assert_eq!(
            group
                .read_signal("CPUFREQ::CPUINFO_MIN_FREQ", Domain::Core, 0)
                .unwrap(),
            1.0e9
        );
        assert_eq!(
            group.signal_behavior("CPU_FREQUENCY_MIN_AVAIL").unwrap(),
            Behavior::Constant
        );
    }

    #[test]
    fn test_missing_tree_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            CpufreqIoGroup::with_root(&cpu_topo(1, 2, 1), dir.path()),
            Err(PlatformError::Hardware(HardwareError::NotSupported(_)))
        ));
    }

    #[test]
    fn test_unreadable_attribute_is_pruned() {
        let tree = cpufreq_tree(2, 1_000_000, 3_700_000);
        fs::remove_file(tree.path().join("cpu1/cpufreq/scaling_cur_freq")).unwrap();
        let group = CpufreqIoGroup::with_root(&cpu_topo(1, 2, 1), tree.path()).unwrap();
        assert!(!group.is_valid_signal("CPUFREQ::SCALING_CUR_FREQ"));
        assert!(!group.is_valid_signal("CPU_FREQUENCY_STATUS"));
        assert!(group.is_valid_signal("CPU_FREQUENCY_MAX_CONTROL"));
    }

    #[test]
    fn test_limit_written_to_every_hyperthread() {
        // 2 cores with 2 threads: cpu0 and cpu2 share core 0
        let tree = cpufreq_tree(4, 1_000_000, 3_700_000);
        let mut group = CpufreqIoGroup::with_root(&cpu_topo(1, 2, 2), tree.path()).unwrap();
        let handle = group
            .push_control("CPU_FREQUENCY_MAX_CONTROL", Domain::Core, 0)
            .unwrap();
        group.adjust(handle, 2.5e9).unwrap();
        group.write_batch().unwrap();
        assert_eq!(read_khz(tree.path(), 0, "scaling_max_freq"), "2500000");
        assert_eq!(read_khz(tree.path(), 2, "scaling_max_freq"), "2500000");
        assert_eq!(read_khz(tree.path(), 1, "scaling_max_freq"), "3700000");
    }

    #[test]
    fn test_limit_follows_detected_siblings() {
        // cpu0 and cpu1 share core 0; cpu4 and cpu5 share core 1; cpu2 and cpu3 are offline
        let tree = cpufreq_tree_with(
            &[(0, 0, 0), (1, 0, 0), (4, 0, 1), (5, 0, 1)],
            1_000_000,
            3_700_000,
        );
        let topo = PlatformTopo::from_sysfs(tree.path(), 0, 0).unwrap();
        let mut group = CpufreqIoGroup::with_root(&topo, tree.path()).unwrap();
        group
            .write_control("CPU_FREQUENCY_MAX_CONTROL", Domain::Core, 1, 2.0e9)
            .unwrap();
        assert_eq!(read_khz(tree.path(), 4, "scaling_max_freq"), "2000000");
        assert_eq!(read_khz(tree.path(), 5, "scaling_max_freq"), "2000000");
        assert_eq!(read_khz(tree.path(), 0, "scaling_max_freq"), "3700000");
        assert_eq!(read_khz(tree.path(), 1, "scaling_max_freq"), "3700000");
        assert_eq!(
            group
                .read_signal("CPU_FREQUENCY_MAX_CONTROL", Domain::Core, 1)
                .unwrap(),
            2.0e9
        );
    }

    #[test]
    fn test_min_above_max_is_rejected() {
        let tree = cpufreq_tree(2, 1_000_000, 3_700_000);
        let mut group = CpufreqIoGroup::with_root(&cpu_topo(1, 2, 1), tree.path()).unwrap();
        group
            .write_control("CPU_FREQUENCY_MAX_CONTROL", Domain::Core, 1, 2.0e9)
            .unwrap();
        let err = group
            .write_control("CPU_FREQUENCY_MIN_CONTROL", Domain::Core, 1, 3.0e9)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Hardware);
        assert_eq!(read_khz(tree.path(), 1, "scaling_min_freq"), "1000000");
    }

    #[test]
    fn test_non_finite_limit_leaves_file_untouched() {
        let tree = cpufreq_tree(2, 1_000_000, 3_700_000);
        let path = tree.path().join("cpu0/cpufreq/scaling_max_freq");
        assert!(matches!(
            write_hz(&path, f64::NAN),
            Err(HardwareError::InvalidArgument(_))
        ));
        assert!(write_hz(&path, f64::INFINITY).is_err());
        assert_eq!(read_khz(tree.path(), 0, "scaling_max_freq"), "3700000");

        let mut group = CpufreqIoGroup::with_root(&cpu_topo(1, 2, 1), tree.path()).unwrap();
        assert!(group
            .write_control("CPU_FREQUENCY_MIN_CONTROL", Domain::Core, 0, f64::NAN)
            .is_err());
        assert_eq!(read_khz(tree.path(), 0, "scaling_min_freq"), "1000000");
    }

    #[test]
    fn test_save_restore_through_dyn_group() {
        let tree = cpufreq_tree(2, 1_000_000, 3_700_000);
        let mut group: Box<dyn IoGroup> =
            Box::new(CpufreqIoGroup::with_root(&cpu_topo(1, 2, 1), tree.path()).unwrap());
        let snapshot = SaveControl::new(group.save_settings().unwrap());
        assert_eq!(snapshot.settings().len(), 4);

        group
            .write_control("CPU_FREQUENCY_MAX_CONTROL", Domain::Core, 0, 1.5e9)
            .unwrap();
        snapshot.restore(group.as_mut()).unwrap();
        assert_eq!(read_khz(tree.path(), 0, "scaling_max_freq"), "3700000");
    }
}
