//! CPU topology detection from sysfs
//!
//! Reads `<root>/online` and `<root>/cpuN/topology/*` (normally
//! `/sys/devices/system/cpu`).

use crate::error::TopologyError;
use crate::topo::{CpuPlacement, TopoCounts};

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Default sysfs CPU directory
pub const DEFAULT_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Parse a kernel CPU list such as `0-3,8,10-11`
pub fn parse_cpu_list(list: &str) -> Result<BTreeSet<usize>, TopologyError> {
    let mut cpus = BTreeSet::new();
    for part in list.trim().split(',').filter(|p| !p.is_empty()) {
        let bad = || TopologyError::Detection(format!("malformed CPU list: {:?}", list));
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.trim().parse().map_err(|_| bad())?;
                let hi: usize = hi.trim().parse().map_err(|_| bad())?;
                if hi < lo {
                    return Err(bad());
                }
                cpus.extend(lo..=hi);
            }
            None => {
                cpus.insert(part.trim().parse().map_err(|_| bad())?);
            }
        }
    }
    Ok(cpus)
}

fn read_id(root: &Path, cpu: usize, attr: &str) -> Result<i64, TopologyError> {
    let path = root.join(format!("cpu{}/topology/{}", cpu, attr));
    let content = std::fs::read_to_string(&path)
        .map_err(|e| TopologyError::Detection(format!("{}: {}", path.display(), e)))?;
    content
        .trim()
        .parse()
        .map_err(|_| TopologyError::Detection(format!("{}: {:?}", path.display(), content)))
}

/// CPU layout read from sysfs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuLayout {
    /// Package/core/thread counts; GPU and memory counts are zero
    pub counts: TopoCounts,
    /// One entry per online CPU, sorted by OS CPU number
    pub cpus: Vec<CpuPlacement>,
}

/// Detect which core and package each online CPU belongs to
///
/// Cores are indexed in `(physical_package_id, core_id)` order so that the
/// cores of one package are contiguous.
pub fn detect_cpu_layout(root: &Path) -> Result<CpuLayout, TopologyError> {
    let online_path = root.join("online");
    let online = std::fs::read_to_string(&online_path)
        .map_err(|e| TopologyError::Detection(format!("{}: {}", online_path.display(), e)))?;
    let cpus = parse_cpu_list(&online)?;
    if cpus.is_empty() {
        return Err(TopologyError::Detection("no online CPUs".to_string()));
    }

    let mut ids = Vec::with_capacity(cpus.len());
    let mut cores: BTreeMap<(i64, i64), usize> = BTreeMap::new();
    for &cpu in &cpus {
        let package = read_id(root, cpu, "physical_package_id")?;
        let core = read_id(root, cpu, "core_id")?;
        *cores.entry((package, core)).or_default() += 1;
        ids.push((cpu, package, core));
    }

    let mut cores_in_package: BTreeMap<i64, usize> = BTreeMap::new();
    for &(package, _) in cores.keys() {
        *cores_in_package.entry(package).or_default() += 1;
    }
    let num_package = cores_in_package.len();
    let num_core = cores.len();
    let cores_per_package = num_core / num_package;
    let threads_per_core = cpus.len() / num_core;
    let uneven = cores_in_package.values().any(|&n| n != cores_per_package)
        || cores.values().any(|&n| n != threads_per_core);
    if uneven {
        return Err(TopologyError::Detection(format!(
            "asymmetric topology: {} CPUs, {} cores, {} packages",
            cpus.len(),
            num_core,
            num_package
        )));
    }
    log::debug!(
        "Detected {} packages, {} cores, {} CPUs",
        num_package,
        num_core,
        cpus.len()
    );

    let core_index: BTreeMap<(i64, i64), usize> = cores
        .keys()
        .enumerate()
        .map(|(idx, &key)| (key, idx))
        .collect();
    let cpus = ids
        .into_iter()
        .map(|(os_cpu, package, core)| CpuPlacement {
            os_cpu,
            core: core_index[&(package, core)],
        })
        .collect();

    Ok(CpuLayout {
        counts: TopoCounts {
            num_package,
            cores_per_package,
            threads_per_core,
            ..TopoCounts::default()
        },
        cpus,
    })
}
