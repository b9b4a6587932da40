//! Fake hardware for testing
//!
//! Provides fake NVML, Intel GPU and ISST backends, raw registers, a recording control
//! sink and small topology helpers so IoGroups can be exercised without
//! real hardware.

use crate::error::{HardwareError, PlatformError};
use crate::iogroup::field::RawRegister;
use crate::iogroup::object::{ClosureControl, ClosureSignal, ControlSink, SignalSource};
use crate::iogroup::{Aggregation, BatchRegistry, Behavior, ControlInfo, IoGroup, SignalInfo, Units};
use crate::levelzero::LevelZeroDevicePool;
use crate::nvml::traits::NvmlDevicePool;
use crate::sst::io::{SstIo, SstRequest};
use crate::topo::{Domain, PlatformTopo, TopoCounts};

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// Topology with the given CPU layout and no accelerators
pub fn cpu_topo(num_package: usize, cores_per_package: usize, threads_per_core: usize) -> PlatformTopo {
    PlatformTopo::new(TopoCounts {
        num_package,
        cores_per_package,
        threads_per_core,
        ..TopoCounts::default()
    })
    .expect("valid fake topology")
}

/// Single-core topology with `num_gpu` accelerators
pub fn topo_with_gpus(num_gpu: usize) -> PlatformTopo {
    PlatformTopo::new(TopoCounts {
        num_gpu,
        ..TopoCounts::default()
    })
    .expect("valid fake topology")
}

/// Topology with `num_gpu` accelerators of `chips_per_gpu` chips each
pub fn topo_with_gpu_chips(num_gpu: usize, chips_per_gpu: usize) -> PlatformTopo {
    PlatformTopo::new(TopoCounts {
        num_gpu,
        num_gpu_chip: num_gpu * chips_per_gpu,
        ..TopoCounts::default()
    })
    .expect("valid fake topology")
}

/// Register whose word can be changed by the test
#[derive(Debug, Clone)]
pub struct FakeRegister {
    word: Rc<Cell<u64>>,
}

impl FakeRegister {
    pub fn new(word: u64) -> Self {
        Self {
            word: Rc::new(Cell::new(word)),
        }
    }

    pub fn set(&self, word: u64) {
        self.word.set(word);
    }
}

impl RawRegister for FakeRegister {
    fn setup_batch(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn batch_bits(&mut self) -> Result<u64, PlatformError> {
        Ok(self.word.get())
    }

    fn read_bits(&self) -> Result<u64, PlatformError> {
        Ok(self.word.get())
    }
}

/// Shared record of control writes keyed by object number
#[derive(Debug, Clone, Default)]
pub struct WriteLog {
    values: Rc<RefCell<BTreeMap<usize, f64>>>,
    writes: Rc<RefCell<Vec<(usize, f64)>>>,
}

impl WriteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Readable control object `index` recording into this log
    pub fn control(&self, index: usize) -> LoggedControl {
        LoggedControl {
            index,
            log: self.clone(),
        }
    }

    /// Set the current value without recording a write
    pub fn preset(&self, index: usize, value: f64) {
        self.values.borrow_mut().insert(index, value);
    }

    /// Current value of object `index`, NaN if never set
    pub fn value(&self, index: usize) -> f64 {
        self.values.borrow().get(&index).copied().unwrap_or(f64::NAN)
    }

    pub fn writes(&self) -> Vec<(usize, f64)> {
        self.writes.borrow().clone()
    }
}

/// Control sink handed out by [`WriteLog::control`]
pub struct LoggedControl {
    index: usize,
    log: WriteLog,
}

impl ControlSink for LoggedControl {
    fn write(&mut self, value: f64) -> Result<(), PlatformError> {
        self.log.writes.borrow_mut().push((self.index, value));
        self.log.preset(self.index, value);
        Ok(())
    }

    fn read(&self) -> Option<Result<f64, PlatformError>> {
        Some(Ok(self.log.value(self.index)))
    }
}

/// Minimal IoGroup built from literal values
pub struct FakeIoGroup {
    name: String,
    registry: BatchRegistry,
}

impl IoGroup for FakeIoGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    fn registry_mut(&mut self) -> &mut BatchRegistry {
        &mut self.registry
    }
}

/// IoGroup with `count` instances of `domain`
///
/// Signal instance `i` reports `base + i` and sums on aggregation. Controls
/// start at zero and read back the last written value.
pub fn single_group(
    name: &str,
    domain: Domain,
    count: usize,
    signals: &[(&str, f64)],
    controls: &[&str],
) -> Box<dyn IoGroup> {
    let mut registry = BatchRegistry::new();
    for &(signal, base) in signals {
        let sources = (0..count)
            .map(|i| Box::new(ClosureSignal::constant(base + i as f64)) as Box<dyn SignalSource>)
            .collect();
        let info = SignalInfo::new(domain, Units::None, Aggregation::Sum, Behavior::Variable, signal);
        registry
            .add_signal(signal, info, sources)
            .expect("unique fake signal");
    }
    for &control in controls {
        let sinks = (0..count)
            .map(|_| {
                let value = Rc::new(Cell::new(0.0));
                let stored = Rc::clone(&value);
                Box::new(
                    ClosureControl::new(move |v| {
                        stored.set(v);
                        Ok(())
                    })
                    .with_read(move || Ok(value.get())),
                ) as Box<dyn ControlSink>
            })
            .collect();
        let info = ControlInfo::new(domain, Units::None, Aggregation::Sum, control);
        registry
            .add_control(control, info, sinks)
            .expect("unique fake control");
    }
    Box::new(FakeIoGroup {
        name: name.to_string(),
        registry,
    })
}

/// State of one fake accelerator, in driver units
#[derive(Debug, Clone)]
pub struct FakeGpu {
    pub sm_mhz: u32,
    pub mem_mhz: u32,
    pub supported_mhz: Vec<u32>,
    pub utilization: u32,
    pub utilization_mem: u32,
    pub power_mw: u32,
    pub power_limit_mw: u32,
    pub throttle_reasons: u64,
    pub temperature: u32,
    pub energy_mj: u64,
    pub performance_state: u32,
    pub rx_kbps: u32,
    pub tx_kbps: u32,
    pub locked_mhz: Option<(u32, u32)>,
    pub resets: usize,
}

impl Default for FakeGpu {
    fn default() -> Self {
        Self {
            sm_mhz: 1410,
            mem_mhz: 1215,
            supported_mhz: vec![1500, 300, 900],
            utilization: 75,
            utilization_mem: 40,
            power_mw: 150_000,
            power_limit_mw: 250_000,
            throttle_reasons: 0x4,
            temperature: 60,
            energy_mj: 5_000_000,
            performance_state: 2,
            rx_kbps: 2000,
            tx_kbps: 1000,
            locked_mhz: None,
            resets: 0,
        }
    }
}

/// In-memory [`NvmlDevicePool`]
#[derive(Debug)]
pub struct FakeNvmlPool {
    gpus: RefCell<Vec<FakeGpu>>,
    privileged: bool,
    unsupported: BTreeSet<&'static str>,
    reported_count: Option<usize>,
}

impl FakeNvmlPool {
    /// `num_gpu` identical privileged devices
    pub fn new(num_gpu: usize) -> Self {
        Self {
            gpus: RefCell::new(vec![FakeGpu::default(); num_gpu]),
            privileged: true,
            unsupported: BTreeSet::new(),
            reported_count: None,
        }
    }

    /// Builder: supported core clocks of every device
    pub fn with_supported_frequencies(self, mhz: Vec<u32>) -> Self {
        for gpu in self.gpus.borrow_mut().iter_mut() {
            gpu.supported_mhz = mhz.clone();
        }
        self
    }

    /// Builder: report no permission to change settings
    pub fn unprivileged(mut self) -> Self {
        self.privileged = false;
        self
    }

    /// Builder: make one query fail with NotSupported, e.g. `"temperature"`
    pub fn with_unsupported(mut self, metric: &'static str) -> Self {
        self.unsupported.insert(metric);
        self
    }

    /// Builder: report a device count different from the real list
    pub fn with_reported_count(mut self, count: usize) -> Self {
        self.reported_count = Some(count);
        self
    }

    /// Change a device in place
    pub fn update(&self, gpu: usize, f: impl FnOnce(&mut FakeGpu)) {
        if let Some(state) = self.gpus.borrow_mut().get_mut(gpu) {
            f(state);
        }
    }

    /// Snapshot of a device
    pub fn gpu(&self, gpu: usize) -> FakeGpu {
        self.gpus.borrow()[gpu].clone()
    }

    fn get<T>(&self, metric: &str, gpu: usize, f: impl FnOnce(&FakeGpu) -> T) -> Result<T, HardwareError> {
        if self.unsupported.contains(metric) {
            return Err(HardwareError::NotSupported(metric.to_string()));
        }
        self.gpus
            .borrow()
            .get(gpu)
            .map(f)
            .ok_or(HardwareError::DeviceNotFound(gpu as u32))
    }

    fn set(&self, metric: &str, gpu: usize, f: impl FnOnce(&mut FakeGpu)) -> Result<(), HardwareError> {
        if self.unsupported.contains(metric) {
            return Err(HardwareError::NotSupported(metric.to_string()));
        }
        if !self.privileged {
            return Err(HardwareError::InsufficientPermissions(metric.to_string()));
        }
        self.gpus
            .borrow_mut()
            .get_mut(gpu)
            .map(f)
            .ok_or(HardwareError::DeviceNotFound(gpu as u32))
    }
}

impl NvmlDevicePool for FakeNvmlPool {
    fn num_gpu(&self) -> Result<usize, HardwareError> {
        Ok(self.reported_count.unwrap_or_else(|| self.gpus.borrow().len()))
    }

    fn frequency_status_sm(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.get("frequency_status_sm", gpu, |g| g.sm_mhz)
    }

    fn frequency_status_mem(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.get("frequency_status_mem", gpu, |g| g.mem_mhz)
    }

    fn supported_frequencies_sm(&self, gpu: usize) -> Result<Vec<u32>, HardwareError> {
        self.get("supported_frequencies_sm", gpu, |g| g.supported_mhz.clone())
    }

    fn utilization(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.get("utilization", gpu, |g| g.utilization)
    }

    fn utilization_mem(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.get("utilization_mem", gpu, |g| g.utilization_mem)
    }

    fn power(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.get("power", gpu, |g| g.power_mw)
    }

    fn power_limit(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.get("power_limit", gpu, |g| g.power_limit_mw)
    }

    fn throttle_reasons(&self, gpu: usize) -> Result<u64, HardwareError> {
        self.get("throttle_reasons", gpu, |g| g.throttle_reasons)
    }

    fn temperature(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.get("temperature", gpu, |g| g.temperature)
    }

    fn energy(&self, gpu: usize) -> Result<u64, HardwareError> {
        self.get("energy", gpu, |g| g.energy_mj)
    }

    fn performance_state(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.get("performance_state", gpu, |g| g.performance_state)
    }

    fn throughput_rx_pcie(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.get("throughput_rx_pcie", gpu, |g| g.rx_kbps)
    }

    fn throughput_tx_pcie(&self, gpu: usize) -> Result<u32, HardwareError> {
        self.get("throughput_tx_pcie", gpu, |g| g.tx_kbps)
    }

    fn frequency_control_sm(&self, gpu: usize, min_mhz: u32, max_mhz: u32) -> Result<(), HardwareError> {
        self.set("frequency_control_sm", gpu, |g| g.locked_mhz = Some((min_mhz, max_mhz)))
    }

    fn frequency_reset_control(&self, gpu: usize) -> Result<(), HardwareError> {
        self.set("frequency_reset_control", gpu, |g| {
            g.locked_mhz = None;
            g.resets += 1;
        })
    }

    fn power_control(&self, gpu: usize, limit_mw: u32) -> Result<(), HardwareError> {
        self.set("power_control", gpu, |g| g.power_limit_mw = limit_mw)
    }

    fn is_privileged_access(&self) -> bool {
        self.privileged
    }
}

/// State of one fake Intel GPU chip, in MHz
#[derive(Debug, Clone, PartialEq)]
pub struct FakeChip {
    pub status: f64,
    pub efficient: f64,
    pub min: f64,
    pub max: f64,
    pub range: (f64, f64),
}

impl Default for FakeChip {
    fn default() -> Self {
        Self {
            status: 1100.0,
            efficient: 800.0,
            min: 300.0,
            max: 1600.0,
            range: (300.0, 1600.0),
        }
    }
}

/// In-memory [`LevelZeroDevicePool`]; chips are stored GPU-major
#[derive(Debug)]
pub struct FakeLevelZeroPool {
    num_gpu: usize,
    chips_per_gpu: usize,
    chips: RefCell<Vec<FakeChip>>,
    controls: RefCell<Vec<(usize, usize, f64, f64)>>,
}

impl FakeLevelZeroPool {
    pub fn new(num_gpu: usize, chips_per_gpu: usize) -> Self {
        Self {
            num_gpu,
            chips_per_gpu,
            chips: RefCell::new(vec![FakeChip::default(); num_gpu * chips_per_gpu]),
            controls: RefCell::new(Vec::new()),
        }
    }

    /// Change a chip in place
    pub fn update(&self, gpu: usize, subdevice: usize, f: impl FnOnce(&mut FakeChip)) {
        let index = gpu * self.chips_per_gpu + subdevice;
        if let Some(chip) = self.chips.borrow_mut().get_mut(index) {
            f(chip);
        }
    }

    /// Snapshot of a chip
    pub fn chip(&self, gpu: usize, subdevice: usize) -> FakeChip {
        self.chips.borrow()[gpu * self.chips_per_gpu + subdevice].clone()
    }

    /// Every `frequency_control` call as `(gpu, subdevice, min, max)`
    pub fn controls(&self) -> Vec<(usize, usize, f64, f64)> {
        self.controls.borrow().clone()
    }

    fn get<T>(&self, gpu: usize, subdevice: usize, f: impl FnOnce(&FakeChip) -> T) -> Result<T, HardwareError> {
        if gpu >= self.num_gpu || subdevice >= self.chips_per_gpu {
            return Err(HardwareError::DeviceNotFound(gpu as u32));
        }
        Ok(f(&self.chips.borrow()[gpu * self.chips_per_gpu + subdevice]))
    }
}

impl LevelZeroDevicePool for FakeLevelZeroPool {
    fn num_gpu(&self) -> Result<usize, HardwareError> {
        Ok(self.num_gpu)
    }

    fn num_gpu_chip(&self) -> Result<usize, HardwareError> {
        Ok(self.num_gpu * self.chips_per_gpu)
    }

    fn frequency_status(&self, gpu: usize, subdevice: usize) -> Result<f64, HardwareError> {
        self.get(gpu, subdevice, |c| c.status)
    }

    fn frequency_efficient(&self, gpu: usize, subdevice: usize) -> Result<f64, HardwareError> {
        self.get(gpu, subdevice, |c| c.efficient)
    }

    fn frequency_min(&self, gpu: usize, subdevice: usize) -> Result<f64, HardwareError> {
        self.get(gpu, subdevice, |c| c.min)
    }

    fn frequency_max(&self, gpu: usize, subdevice: usize) -> Result<f64, HardwareError> {
        self.get(gpu, subdevice, |c| c.max)
    }

    fn frequency_range(&self, gpu: usize, subdevice: usize) -> Result<(f64, f64), HardwareError> {
        self.get(gpu, subdevice, |c| c.range)
    }

    fn frequency_control(
        &self,
        gpu: usize,
        subdevice: usize,
        min_mhz: f64,
        max_mhz: f64,
    ) -> Result<(), HardwareError> {
        self.get(gpu, subdevice, |_| ())?;
        self.update(gpu, subdevice, |c| c.range = (min_mhz, max_mhz));
        self.controls
            .borrow_mut()
            .push((gpu, subdevice, min_mhz, max_mhz));
        Ok(())
    }
}

type MboxWrite = (usize, u16, u16, u32, u32);

/// In-memory [`SstIo`]
///
/// Unset requests read as zero. MMIO writes update the stored register;
/// mailbox writes update a read-back request only when mirrored.
#[derive(Debug, Default)]
pub struct FakeSstIo {
    values: RefCell<BTreeMap<SstRequest, u32>>,
    punit: RefCell<BTreeMap<usize, u32>>,
    mirrors: RefCell<Vec<(u16, u16, u16, u32)>>,
    mbox_writes: RefCell<Vec<MboxWrite>>,
    mmio_writes: RefCell<Vec<(usize, u32, u32)>>,
    read_calls: Cell<usize>,
    last_read_size: Cell<usize>,
    fail_mmio: Cell<bool>,
}

impl FakeSstIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, request: SstRequest, value: u32) {
        self.values.borrow_mut().insert(request, value);
    }

    /// Map a logical CPU to a punit core; unmapped CPUs map to themselves
    pub fn set_punit_core(&self, cpu: usize, core: u32) {
        self.punit.borrow_mut().insert(cpu, core);
    }

    /// Make every MMIO read fail
    pub fn fail_mmio(&self) {
        self.fail_mmio.set(true);
    }

    /// Store data written with (command, write_subcommand) as the response
    /// to (command, read_subcommand, read_data)
    pub fn mirror_mbox(&self, command: u16, write_subcommand: u16, read_subcommand: u16, read_data: u32) {
        self.mirrors
            .borrow_mut()
            .push((command, write_subcommand, read_subcommand, read_data));
    }

    /// Number of `read_many` calls so far
    pub fn read_calls(&self) -> usize {
        self.read_calls.get()
    }

    /// Request count of the last `read_many` call
    pub fn last_read_size(&self) -> usize {
        self.last_read_size.get()
    }

    pub fn mbox_writes(&self) -> Vec<MboxWrite> {
        self.mbox_writes.borrow().clone()
    }

    pub fn mmio_writes(&self) -> Vec<(usize, u32, u32)> {
        self.mmio_writes.borrow().clone()
    }
}

impl SstIo for FakeSstIo {
    fn punit_core(&self, cpu: usize) -> Result<u32, HardwareError> {
        Ok(self.punit.borrow().get(&cpu).copied().unwrap_or(cpu as u32))
    }

    fn read_many(&self, requests: &[SstRequest]) -> Result<Vec<u32>, HardwareError> {
        self.read_calls.set(self.read_calls.get() + 1);
        self.last_read_size.set(requests.len());
        let values = self.values.borrow();
        requests
            .iter()
            .map(|request| match request {
                SstRequest::Mmio { .. } if self.fail_mmio.get() => {
                    Err(HardwareError::NotSupported(request.to_string()))
                }
                _ => Ok(values.get(request).copied().unwrap_or(0)),
            })
            .collect()
    }

    fn write_mbox(
        &self,
        cpu: usize,
        command: u16,
        subcommand: u16,
        parameter: u32,
        data: u32,
    ) -> Result<(), HardwareError> {
        self.mbox_writes
            .borrow_mut()
            .push((cpu, command, subcommand, parameter, data));
        let mirrors = self.mirrors.borrow();
        for &(mirror_command, write_subcommand, read_subcommand, read_data) in mirrors.iter() {
            if mirror_command == command && write_subcommand == subcommand {
                self.set(
                    SstRequest::Mbox {
                        cpu,
                        command,
                        subcommand: read_subcommand,
                        request_data: read_data,
                    },
                    data,
                );
            }
        }
        Ok(())
    }

    fn write_mmio(&self, cpu: usize, offset: u32, value: u32) -> Result<(), HardwareError> {
        self.mmio_writes.borrow_mut().push((cpu, offset, value));
        self.set(SstRequest::Mmio { cpu, offset }, value);
        Ok(())
    }
}

/// Temporary sysfs CPU tree: one package, one core per CPU, with cpufreq
/// attributes in kHz
#[cfg(test)]
pub fn cpufreq_tree(num_cpu: usize, min_khz: u64, max_khz: u64) -> tempfile::TempDir {
    let cpus: Vec<(usize, usize, usize)> = (0..num_cpu).map(|cpu| (cpu, 0, cpu)).collect();
    cpufreq_tree_with(&cpus, min_khz, max_khz)
}

/// Temporary sysfs CPU tree with the given `(cpu, package_id, core_id)`
/// entries online
#[cfg(test)]
pub fn cpufreq_tree_with(
    cpus: &[(usize, usize, usize)],
    min_khz: u64,
    max_khz: u64,
) -> tempfile::TempDir {
    use std::fs;

    let dir = tempfile::tempdir().expect("tempdir");
    let online: Vec<String> = cpus.iter().map(|(cpu, _, _)| cpu.to_string()).collect();
    fs::write(dir.path().join("online"), format!("{}\n", online.join(","))).expect("online");
    for &(cpu, package, core) in cpus {
        let topology = dir.path().join(format!("cpu{}/topology", cpu));
        fs::create_dir_all(&topology).expect("topology dir");
        fs::write(topology.join("physical_package_id"), format!("{}\n", package)).expect("package id");
        fs::write(topology.join("core_id"), format!("{}\n", core)).expect("core id");

        let cpufreq = dir.path().join(format!("cpu{}/cpufreq", cpu));
        fs::create_dir_all(&cpufreq).expect("cpufreq dir");
        for (file, khz) in [
            ("cpuinfo_min_freq", min_khz),
            ("cpuinfo_max_freq", max_khz),
            ("scaling_min_freq", min_khz),
            ("scaling_max_freq", max_khz),
            ("scaling_cur_freq", max_khz),
        ] {
            fs::write(cpufreq.join(file), format!("{}\n", khz)).expect("cpufreq attribute");
        }
    }
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_pool_records_controls() {
        let pool = FakeNvmlPool::new(2);
        pool.frequency_control_sm(1, 300, 900).unwrap();
        assert_eq!(pool.gpu(1).locked_mhz, Some((300, 900)));
        pool.frequency_reset_control(1).unwrap();
        assert_eq!(pool.gpu(1).locked_mhz, None);
        assert_eq!(pool.gpu(1).resets, 1);
        assert!(matches!(
            pool.power(2),
            Err(HardwareError::DeviceNotFound(2))
        ));
    }

    #[test]
    fn test_fake_pool_unprivileged_writes_fail() {
        let pool = FakeNvmlPool::new(1).unprivileged();
        assert!(!pool.is_privileged_access());
        assert!(matches!(
            pool.power_control(0, 100_000),
            Err(HardwareError::InsufficientPermissions(_))
        ));
    }

    #[test]
    fn test_fake_sst_mirrors_mbox_writes() {
        let io = FakeSstIo::new();
        io.mirror_mbox(0xd0, 0x02, 0x02, 0x00);
        io.write_mbox(3, 0xd0, 0x02, 0x100, 0x2).unwrap();
        let read = io
            .read_many(&[SstRequest::Mbox {
                cpu: 3,
                command: 0xd0,
                subcommand: 0x02,
                request_data: 0x00,
            }])
            .unwrap();
        assert_eq!(read, vec![0x2]);
        assert_eq!(io.read_calls(), 1);
    }

    #[test]
    fn test_write_log_tracks_values() {
        let log = WriteLog::new();
        let mut control = log.control(3);
        assert!(log.value(3).is_nan());
        control.write(42.0).unwrap();
        assert_eq!(log.value(3), 42.0);
        assert_eq!(log.writes(), vec![(3, 42.0)]);
    }
}
