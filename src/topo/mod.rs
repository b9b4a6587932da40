//! Platform topology
//!
//! Describes how many instances of each hardware domain exist and how they
//! nest. Built once from counts, or from a detected CPU table, and
//! immutable afterwards.

pub mod sysfs;

use crate::error::TopologyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Hardware granularity of a signal or control
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// The whole node
    Board,
    /// CPU socket
    Package,
    /// Physical core
    Core,
    /// Logical CPU (hardware thread)
    Cpu,
    /// Memory attached to a package
    Memory,
    /// Accelerator board
    Gpu,
    /// Accelerator sub-device
    GpuChip,
}

impl Domain {
    /// All domains, coarsest CPU-side first
    pub const ALL: [Domain; 7] = [
        Domain::Board,
        Domain::Package,
        Domain::Core,
        Domain::Cpu,
        Domain::Memory,
        Domain::Gpu,
        Domain::GpuChip,
    ];

    /// Canonical lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            Domain::Board => "board",
            Domain::Package => "package",
            Domain::Core => "core",
            Domain::Cpu => "cpu",
            Domain::Memory => "memory",
            Domain::Gpu => "gpu",
            Domain::GpuChip => "gpu_chip",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Domain {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Domain::ALL
            .iter()
            .copied()
            .find(|d| d.name() == lower)
            .ok_or_else(|| TopologyError::UnknownDomain(s.to_string()))
    }
}

/// Backend addressing for one domain instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeHandle {
    /// Node-wide resource
    Board,
    /// Logical CPU number to issue the request on
    Cpu(usize),
    /// Memory region index
    Memory(usize),
    /// Accelerator device index
    Gpu { device: usize },
    /// Accelerator device and sub-device index
    GpuChip { device: usize, subdevice: usize },
}

/// Instance counts describing a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopoCounts {
    pub num_package: usize,
    pub cores_per_package: usize,
    pub threads_per_core: usize,
    pub num_memory: usize,
    pub num_gpu: usize,
    pub num_gpu_chip: usize,
}

impl Default for TopoCounts {
    fn default() -> Self {
        Self {
            num_package: 1,
            cores_per_package: 1,
            threads_per_core: 1,
            num_memory: 0,
            num_gpu: 0,
            num_gpu_chip: 0,
        }
    }
}

/// Placement of one logical CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuPlacement {
    /// Number the kernel uses for this CPU (`cpuN` in sysfs)
    pub os_cpu: usize,
    /// Index of the core domain instance holding this CPU
    pub core: usize,
}

/// Immutable platform topology
///
/// CPU domain indices are positions in the list of online CPUs sorted by OS
/// number. Core `k` belongs to package `k / cores_per_package`. Without a
/// detected layout, hardware threads of one core are `num_core` apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformTopo {
    counts: TopoCounts,
    chips_per_gpu: usize,
    cpus: Vec<CpuPlacement>,
}

impl PlatformTopo {
    /// Build a topology, validating that every nesting relation is whole
    pub fn new(counts: TopoCounts) -> Result<Self, TopologyError> {
        let chips_per_gpu = Self::check_counts(&counts)?;
        let num_core = counts.num_package * counts.cores_per_package;
        let cpus = (0..num_core * counts.threads_per_core)
            .map(|cpu| CpuPlacement {
                os_cpu: cpu,
                core: cpu % num_core,
            })
            .collect();
        Ok(Self {
            counts,
            chips_per_gpu,
            cpus,
        })
    }

    /// Build a topology with an explicit CPU to core table
    ///
    /// `cpus` must hold `threads_per_core` entries for every core and be
    /// sorted by OS CPU number without duplicates.
    pub fn with_cpu_layout(
        counts: TopoCounts,
        cpus: Vec<CpuPlacement>,
    ) -> Result<Self, TopologyError> {
        let chips_per_gpu = Self::check_counts(&counts)?;
        let num_core = counts.num_package * counts.cores_per_package;
        if cpus.len() != num_core * counts.threads_per_core {
            return Err(TopologyError::InvalidCounts(format!(
                "{} CPUs listed for {} cores of {} threads",
                cpus.len(),
                num_core,
                counts.threads_per_core
            )));
        }
        if cpus.windows(2).any(|w| w[0].os_cpu >= w[1].os_cpu) {
            return Err(TopologyError::InvalidCounts(
                "CPU table is not sorted by OS CPU number".to_string(),
            ));
        }
        let mut threads = vec![0usize; num_core];
        for placement in &cpus {
            match threads.get_mut(placement.core) {
                Some(n) => *n += 1,
                None => {
                    return Err(TopologyError::InvalidCounts(format!(
                        "CPU {} placed in core {} of {}",
                        placement.os_cpu, placement.core, num_core
                    )))
                }
            }
        }
        if let Some(core) = threads.iter().position(|&n| n != counts.threads_per_core) {
            return Err(TopologyError::InvalidCounts(format!(
                "core {} has {} threads, expected {}",
                core, threads[core], counts.threads_per_core
            )));
        }
        Ok(Self {
            counts,
            chips_per_gpu,
            cpus,
        })
    }

    fn check_counts(counts: &TopoCounts) -> Result<usize, TopologyError> {
        if counts.num_package == 0 || counts.cores_per_package == 0 || counts.threads_per_core == 0
        {
            return Err(TopologyError::InvalidCounts(format!(
                "package/core/thread counts must be non-zero: {}x{}x{}",
                counts.num_package, counts.cores_per_package, counts.threads_per_core
            )));
        }
        match (counts.num_gpu, counts.num_gpu_chip) {
            (_, 0) => Ok(0),
            (0, chips) => Err(TopologyError::InvalidCounts(format!(
                "{} GPU chips without any GPU",
                chips
            ))),
            (gpus, chips) if chips % gpus != 0 => Err(TopologyError::UnevenSubdevices {
                num_gpu: gpus,
                num_gpu_chip: chips,
            }),
            (gpus, chips) => Ok(chips / gpus),
        }
    }

    /// Build from the CPU layout under `root` (normally
    /// [`sysfs::DEFAULT_CPU_ROOT`]) plus accelerator counts known elsewhere
    pub fn from_sysfs(
        root: &std::path::Path,
        num_gpu: usize,
        num_gpu_chip: usize,
    ) -> Result<Self, TopologyError> {
        let layout = sysfs::detect_cpu_layout(root)?;
        let counts = TopoCounts {
            num_gpu,
            num_gpu_chip,
            ..layout.counts
        };
        Self::with_cpu_layout(counts, layout.cpus)
    }

    /// The counts this topology was built from
    pub fn counts(&self) -> &TopoCounts {
        &self.counts
    }

    fn num_core(&self) -> usize {
        self.counts.num_package * self.counts.cores_per_package
    }

    /// Number of instances of `domain`
    pub fn num_domain(&self, domain: Domain) -> usize {
        match domain {
            Domain::Board => 1,
            Domain::Package => self.counts.num_package,
            Domain::Core => self.num_core(),
            Domain::Cpu => self.num_core() * self.counts.threads_per_core,
            Domain::Memory => self.counts.num_memory,
            Domain::Gpu => self.counts.num_gpu,
            Domain::GpuChip => self.counts.num_gpu_chip,
        }
    }

    /// Fail unless `index < num_domain(domain)`
    pub fn check_index(&self, domain: Domain, index: usize) -> Result<(), TopologyError> {
        let count = self.num_domain(domain);
        if index >= count {
            return Err(TopologyError::IndexOutOfRange {
                domain,
                index,
                count,
            });
        }
        Ok(())
    }

    fn memory_per_package(&self) -> Option<usize> {
        let num_memory = self.counts.num_memory;
        (num_memory > 0 && num_memory % self.counts.num_package == 0)
            .then(|| num_memory / self.counts.num_package)
    }

    /// True if every instance of `inner` lies within exactly one `outer`
    pub fn is_nested_domain(&self, inner: Domain, outer: Domain) -> bool {
        use Domain::*;
        match (inner, outer) {
            _ if inner == outer => true,
            (_, Board) => true,
            (Core | Cpu, Package) => true,
            (Cpu, Core) => true,
            (Memory, Package) => self.memory_per_package().is_some(),
            (GpuChip, Gpu) => self.chips_per_gpu > 0,
            _ => false,
        }
    }

    /// Indices of `inner` contained in instance `outer_idx` of `outer`
    pub fn domain_nested(
        &self,
        inner: Domain,
        outer: Domain,
        outer_idx: usize,
    ) -> Result<BTreeSet<usize>, TopologyError> {
        use Domain::*;
        self.check_index(outer, outer_idx)?;
        if !self.is_nested_domain(inner, outer) {
            return Err(TopologyError::UnsupportedNesting { inner, outer });
        }
        let cpp = self.counts.cores_per_package;
        let result = match (inner, outer) {
            _ if inner == outer => std::iter::once(outer_idx).collect(),
            (_, Board) => (0..self.num_domain(inner)).collect(),
            (Core, Package) => (outer_idx * cpp..(outer_idx + 1) * cpp).collect(),
            (Cpu, Package) => self.cpus_where(|core| core / cpp == outer_idx),
            (Cpu, Core) => self.cpus_where(|core| core == outer_idx),
            (Memory, Package) => {
                let per = self.memory_per_package().unwrap_or(0);
                (outer_idx * per..(outer_idx + 1) * per).collect()
            }
            (GpuChip, Gpu) => {
                let per = self.chips_per_gpu;
                (outer_idx * per..(outer_idx + 1) * per).collect()
            }
            _ => return Err(TopologyError::UnsupportedNesting { inner, outer }),
        };
        Ok(result)
    }

    fn cpus_where(&self, in_outer: impl Fn(usize) -> bool) -> BTreeSet<usize> {
        self.cpus
            .iter()
            .enumerate()
            .filter(|(_, p)| in_outer(p.core))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Index of the `domain` instance that contains logical CPU `cpu`
    pub fn domain_idx(&self, domain: Domain, cpu: usize) -> Result<usize, TopologyError> {
        self.check_index(Domain::Cpu, cpu)?;
        let core = self.cpus[cpu].core;
        match domain {
            Domain::Board => Ok(0),
            Domain::Package => Ok(core / self.counts.cores_per_package),
            Domain::Core => Ok(core),
            Domain::Cpu => Ok(cpu),
            other => Err(TopologyError::UnsupportedNesting {
                inner: Domain::Cpu,
                outer: other,
            }),
        }
    }

    /// Split a GPU chip index into (device, subdevice)
    pub fn gpu_chip_to_gpu(&self, chip: usize) -> Result<(usize, usize), TopologyError> {
        self.check_index(Domain::GpuChip, chip)?;
        Ok((chip / self.chips_per_gpu, chip % self.chips_per_gpu))
    }

    /// Backend addressing for instance `index` of `domain`
    ///
    /// CPU-side domains resolve to the lowest numbered online CPU they
    /// contain, as the kernel numbers it.
    pub fn resolve_to_native(
        &self,
        domain: Domain,
        index: usize,
    ) -> Result<NativeHandle, TopologyError> {
        self.check_index(domain, index)?;
        let handle = match domain {
            Domain::Board => NativeHandle::Board,
            Domain::Package | Domain::Core | Domain::Cpu => {
                let first = self
                    .native_cpus(domain, index)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        TopologyError::InvalidCounts(format!("{} {} has no CPUs", domain, index))
                    })?;
                NativeHandle::Cpu(first)
            }
            Domain::Memory => NativeHandle::Memory(index),
            Domain::Gpu => NativeHandle::Gpu { device: index },
            Domain::GpuChip => {
                let (device, subdevice) = self.gpu_chip_to_gpu(index)?;
                NativeHandle::GpuChip { device, subdevice }
            }
        };
        Ok(handle)
    }

    /// OS numbers of every CPU inside instance `index` of a CPU-side domain,
    /// in ascending order
    pub fn native_cpus(&self, domain: Domain, index: usize) -> Result<Vec<usize>, TopologyError> {
        Ok(self
            .domain_nested(Domain::Cpu, domain, index)?
            .into_iter()
            .map(|cpu| self.cpus[cpu].os_cpu)
            .collect())
    }

    /// OS number of the lowest CPU inside instance `index` of a CPU-side domain
    pub fn first_cpu(&self, domain: Domain, index: usize) -> Result<usize, TopologyError> {
        match self.resolve_to_native(domain, index)? {
            NativeHandle::Cpu(cpu) => Ok(cpu),
            NativeHandle::Board => self.first_cpu(Domain::Cpu, 0),
            _ => Err(TopologyError::UnsupportedNesting {
                inner: Domain::Cpu,
                outer: domain,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_socket() -> PlatformTopo {
        PlatformTopo::new(TopoCounts {
            num_package: 2,
            cores_per_package: 4,
            threads_per_core: 2,
            num_memory: 2,
            num_gpu: 2,
            num_gpu_chip: 4,
        })
        .unwrap()
    }

    #[test]
    fn test_domain_counts() {
        let topo = two_socket();
        assert_eq!(topo.num_domain(Domain::Board), 1);
        assert_eq!(topo.num_domain(Domain::Package), 2);
        assert_eq!(topo.num_domain(Domain::Core), 8);
        assert_eq!(topo.num_domain(Domain::Cpu), 16);
        assert_eq!(topo.num_domain(Domain::GpuChip), 4);
    }

    #[test]
    fn test_domain_name_round_trip() {
        for domain in Domain::ALL {
            assert_eq!(domain.name().parse::<Domain>().unwrap(), domain);
        }
        assert_eq!("GPU_CHIP".parse::<Domain>().unwrap(), Domain::GpuChip);
        assert!("socket".parse::<Domain>().is_err());
    }

    #[test]
    fn test_nested_cpus() {
        let topo = two_socket();
        let cpus = topo.domain_nested(Domain::Cpu, Domain::Core, 3).unwrap();
        assert_eq!(cpus.into_iter().collect::<Vec<_>>(), vec![3, 11]);

        let cpus = topo.domain_nested(Domain::Cpu, Domain::Package, 1).unwrap();
        assert_eq!(
            cpus.into_iter().collect::<Vec<_>>(),
            vec![4, 5, 6, 7, 12, 13, 14, 15]
        );

        let cores = topo.domain_nested(Domain::Core, Domain::Board, 0).unwrap();
        assert_eq!(cores.len(), 8);
    }

    #[test]
    fn test_nested_gpu_chips() {
        let topo = two_socket();
        let chips = topo.domain_nested(Domain::GpuChip, Domain::Gpu, 1).unwrap();
        assert_eq!(chips.into_iter().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_undefined_nesting_is_error() {
        let topo = two_socket();
        let err = topo
            .domain_nested(Domain::Cpu, Domain::Gpu, 0)
            .unwrap_err();
        assert!(matches!(err, TopologyError::UnsupportedNesting { .. }));
        assert!(!topo.is_nested_domain(Domain::Package, Domain::Core));
    }

    #[test]
    fn test_nested_outer_index_out_of_range() {
        let topo = two_socket();
        let err = topo
            .domain_nested(Domain::Core, Domain::Package, 2)
            .unwrap_err();
        assert!(matches!(err, TopologyError::IndexOutOfRange { count: 2, .. }));
    }

    #[test]
    fn test_domain_idx_from_cpu() {
        let topo = two_socket();
        assert_eq!(topo.domain_idx(Domain::Core, 13).unwrap(), 5);
        assert_eq!(topo.domain_idx(Domain::Package, 13).unwrap(), 1);
        assert_eq!(topo.domain_idx(Domain::Board, 13).unwrap(), 0);
        assert!(topo.domain_idx(Domain::Gpu, 0).is_err());
        assert!(topo.domain_idx(Domain::Cpu, 16).is_err());
    }

    #[test]
    fn test_resolve_gpu_chip() {
        let topo = two_socket();
        assert_eq!(
            topo.resolve_to_native(Domain::GpuChip, 3).unwrap(),
            NativeHandle::GpuChip {
                device: 1,
                subdevice: 1
            }
        );
        assert_eq!(
            topo.resolve_to_native(Domain::Package, 1).unwrap(),
            NativeHandle::Cpu(4)
        );
        assert!(topo.resolve_to_native(Domain::Gpu, 2).is_err());
    }

    #[test]
    fn test_uneven_chips_rejected_eagerly() {
        let err = PlatformTopo::new(TopoCounts {
            num_gpu: 2,
            num_gpu_chip: 3,
            ..TopoCounts::default()
        })
        .unwrap_err();
        assert_eq!(
            err,
            TopologyError::UnevenSubdevices {
                num_gpu: 2,
                num_gpu_chip: 3
            }
        );
    }

    #[test]
    fn test_memory_nesting_requires_even_split() {
        let topo = PlatformTopo::new(TopoCounts {
            num_package: 2,
            num_memory: 3,
            ..TopoCounts::default()
        })
        .unwrap();
        assert!(topo
            .domain_nested(Domain::Memory, Domain::Package, 0)
            .is_err());
    }

    fn placement(os_cpu: usize, core: usize) -> CpuPlacement {
        CpuPlacement { os_cpu, core }
    }

    #[test]
    fn test_cpu_layout_drives_nesting() {
        let counts = TopoCounts {
            cores_per_package: 2,
            threads_per_core: 2,
            ..TopoCounts::default()
        };
        let cpus = vec![placement(0, 0), placement(1, 0), placement(2, 1), placement(3, 1)];
        let topo = PlatformTopo::with_cpu_layout(counts, cpus).unwrap();
        let nested = topo.domain_nested(Domain::Cpu, Domain::Core, 1).unwrap();
        assert_eq!(nested.into_iter().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(topo.domain_idx(Domain::Core, 1).unwrap(), 0);
        assert_eq!(
            topo.resolve_to_native(Domain::Core, 1).unwrap(),
            NativeHandle::Cpu(2)
        );
    }

    #[test]
    fn test_cpu_layout_rejects_uneven_cores() {
        let counts = TopoCounts {
            cores_per_package: 2,
            threads_per_core: 2,
            ..TopoCounts::default()
        };
        let cpus = vec![placement(0, 0), placement(1, 0), placement(2, 0), placement(3, 1)];
        assert!(matches!(
            PlatformTopo::with_cpu_layout(counts, cpus),
            Err(TopologyError::InvalidCounts(_))
        ));
        let unsorted = vec![placement(1, 0), placement(0, 0), placement(2, 1), placement(3, 1)];
        assert!(PlatformTopo::with_cpu_layout(counts, unsorted).is_err());
        let stray = vec![placement(0, 0), placement(1, 0), placement(2, 1), placement(3, 2)];
        assert!(PlatformTopo::with_cpu_layout(counts, stray).is_err());
    }
}
