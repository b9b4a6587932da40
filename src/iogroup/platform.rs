//! Platform-wide view over all loaded IoGroups
//!
//! [`PlatformIo`] routes each name to the first group that provides it and
//! hands out global batch handles. Immediate reads and writes may target a
//! domain coarser than the native one; the values of the nested instances
//! are then aggregated (reads) or all written (writes).

use crate::error::PlatformError;
use crate::iogroup::agg::Aggregation;
use crate::iogroup::descriptor::Format;
use crate::iogroup::save::{ControlSetting, ControlWriter, SaveControl};
use crate::iogroup::IoGroup;
use crate::topo::{Domain, PlatformTopo};

use std::collections::BTreeSet;

type Constructor = Box<dyn Fn() -> Result<Box<dyn IoGroup>, PlatformError>>;

/// Ordered list of named IoGroup constructors
#[derive(Default)]
pub struct IoGroupFactory {
    entries: Vec<(String, Constructor)>,
}

impl IoGroupFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constructor; earlier registrations take precedence for names
    pub fn register(
        &mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> Result<Box<dyn IoGroup>, PlatformError> + 'static,
    ) {
        self.entries.push((name.into(), Box::new(constructor)));
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Construct one group by name
    pub fn build(&self, name: &str) -> Option<Result<Box<dyn IoGroup>, PlatformError>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ctor)| ctor())
    }

    /// Construct every group, keeping those whose construction succeeds
    pub fn load(&self) -> Vec<Box<dyn IoGroup>> {
        let mut groups = Vec::new();
        for (name, ctor) in &self.entries {
            match ctor() {
                Ok(group) => {
                    log::debug!(
                        "Loaded {} IoGroup: {} signals, {} controls",
                        name,
                        group.signal_names().len(),
                        group.control_names().len()
                    );
                    groups.push(group);
                }
                Err(e) => log::warn!("Skipping {} IoGroup: {}", name, e),
            }
        }
        groups
    }
}

/// All loaded IoGroups behind one signal/control namespace
pub struct PlatformIo {
    topo: PlatformTopo,
    groups: Vec<Box<dyn IoGroup>>,
    pushed_signals: Vec<(usize, usize)>,
    pushed_controls: Vec<(usize, usize)>,
}

impl PlatformIo {
    pub fn new(topo: PlatformTopo, groups: Vec<Box<dyn IoGroup>>) -> Self {
        Self {
            topo,
            groups,
            pushed_signals: Vec::new(),
            pushed_controls: Vec::new(),
        }
    }

    pub fn topo(&self) -> &PlatformTopo {
        &self.topo
    }

    /// Names of the loaded groups
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name()).collect()
    }

    fn signal_group(&self, name: &str) -> Result<usize, PlatformError> {
        self.groups
            .iter()
            .position(|g| g.is_valid_signal(name))
            .ok_or_else(|| PlatformError::UnknownSignal(name.to_string()))
    }

    fn control_group(&self, name: &str) -> Result<usize, PlatformError> {
        self.groups
            .iter()
            .position(|g| g.is_valid_control(name))
            .ok_or_else(|| PlatformError::UnknownControl(name.to_string()))
    }

    pub fn signal_names(&self) -> BTreeSet<String> {
        self.groups.iter().flat_map(|g| g.signal_names()).collect()
    }

    pub fn control_names(&self) -> BTreeSet<String> {
        self.groups.iter().flat_map(|g| g.control_names()).collect()
    }

    pub fn is_valid_signal(&self, name: &str) -> bool {
        self.signal_group(name).is_ok()
    }

    pub fn is_valid_control(&self, name: &str) -> bool {
        self.control_group(name).is_ok()
    }

    pub fn signal_domain_type(&self, name: &str) -> Result<Domain, PlatformError> {
        let group = &self.groups[self.signal_group(name)?];
        group
            .signal_domain_type(name)
            .ok_or_else(|| PlatformError::UnknownSignal(name.to_string()))
    }

    pub fn control_domain_type(&self, name: &str) -> Result<Domain, PlatformError> {
        let group = &self.groups[self.control_group(name)?];
        group
            .control_domain_type(name)
            .ok_or_else(|| PlatformError::UnknownControl(name.to_string()))
    }

    pub fn signal_description(&self, name: &str) -> Result<String, PlatformError> {
        self.groups[self.signal_group(name)?].signal_description(name)
    }

    pub fn control_description(&self, name: &str) -> Result<String, PlatformError> {
        self.groups[self.control_group(name)?].control_description(name)
    }

    pub fn aggregation(&self, name: &str) -> Result<Aggregation, PlatformError> {
        match self.signal_group(name) {
            Ok(g) => self.groups[g].aggregation(name),
            Err(_) => self.groups[self.control_group(name)?].aggregation(name),
        }
    }

    pub fn format(&self, name: &str) -> Result<Format, PlatformError> {
        self.groups[self.signal_group(name)?].format(name)
    }

    pub fn push_signal(&mut self, name: &str, domain: Domain, index: usize) -> Result<usize, PlatformError> {
        let g = self.signal_group(name)?;
        let local = self.groups[g].push_signal(name, domain, index)?;
        Ok(Self::global_handle(&mut self.pushed_signals, (g, local)))
    }

    pub fn push_control(&mut self, name: &str, domain: Domain, index: usize) -> Result<usize, PlatformError> {
        let g = self.control_group(name)?;
        let local = self.groups[g].push_control(name, domain, index)?;
        Ok(Self::global_handle(&mut self.pushed_controls, (g, local)))
    }

    fn global_handle(pushed: &mut Vec<(usize, usize)>, key: (usize, usize)) -> usize {
        match pushed.iter().position(|p| *p == key) {
            Some(handle) => handle,
            None => {
                pushed.push(key);
                pushed.len() - 1
            }
        }
    }

    pub fn read_batch(&mut self) -> Result<(), PlatformError> {
        for group in &mut self.groups {
            group.read_batch()?;
        }
        Ok(())
    }

    pub fn write_batch(&mut self) -> Result<(), PlatformError> {
        for group in &mut self.groups {
            group.write_batch()?;
        }
        Ok(())
    }

    pub fn sample(&self, handle: usize) -> Result<f64, PlatformError> {
        let (g, local) = *self
            .pushed_signals
            .get(handle)
            .ok_or(PlatformError::BatchIndexOutOfRange(handle))?;
        self.groups[g].sample(local)
    }

    pub fn adjust(&mut self, handle: usize, setting: f64) -> Result<(), PlatformError> {
        let (g, local) = *self
            .pushed_controls
            .get(handle)
            .ok_or(PlatformError::BatchIndexOutOfRange(handle))?;
        self.groups[g].adjust(local, setting)
    }

    /// Immediate read; a coarser domain aggregates its nested native instances
    pub fn read_signal(&self, name: &str, domain: Domain, index: usize) -> Result<f64, PlatformError> {
        let g = self.signal_group(name)?;
        let group = &self.groups[g];
        let native = group
            .signal_domain_type(name)
            .ok_or_else(|| PlatformError::UnknownSignal(name.to_string()))?;
        if native == domain || !self.topo.is_nested_domain(native, domain) {
            return group.read_signal(name, domain, index);
        }
        let nested = self.topo.domain_nested(native, domain, index)?;
        let values = nested
            .into_iter()
            .map(|i| group.read_signal(name, native, i))
            .collect::<Result<Vec<f64>, PlatformError>>()?;
        Ok(group.aggregation(name)?.apply(&values))
    }

    /// Immediate write; a coarser domain writes every nested native instance
    pub fn write_control(
        &mut self,
        name: &str,
        domain: Domain,
        index: usize,
        setting: f64,
    ) -> Result<(), PlatformError> {
        let g = self.control_group(name)?;
        let native = self.groups[g]
            .control_domain_type(name)
            .ok_or_else(|| PlatformError::UnknownControl(name.to_string()))?;
        if native == domain || !self.topo.is_nested_domain(native, domain) {
            return self.groups[g].write_control(name, domain, index, setting);
        }
        for i in self.topo.domain_nested(native, domain, index)? {
            self.groups[g].write_control(name, native, i, setting)?;
        }
        Ok(())
    }

    /// Snapshot of every restorable control in every group
    pub fn save_control(&self) -> Result<SaveControl, PlatformError> {
        let mut settings: Vec<ControlSetting> = Vec::new();
        for group in &self.groups {
            settings.extend(group.save_settings()?);
        }
        log::debug!("Saved {} control settings", settings.len());
        Ok(SaveControl::new(settings))
    }

    /// Replay a snapshot taken by [`save_control`](Self::save_control)
    pub fn restore_control(&mut self, snapshot: &SaveControl) -> Result<(), PlatformError> {
        snapshot.restore(self)
    }
}

impl ControlWriter for PlatformIo {
    fn write_control(
        &mut self,
        name: &str,
        domain: Domain,
        domain_idx: usize,
        setting: f64,
    ) -> Result<(), PlatformError> {
        PlatformIo::write_control(self, name, domain, domain_idx, setting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, HardwareError, TopologyError};
    use crate::mock::{single_group, topo_with_gpus};

    fn platform() -> PlatformIo {
        let topo = topo_with_gpus(2);
        let groups = vec![
            single_group("A", Domain::Gpu, 2, &[("POWER", 10.0)], &["LIMIT"]),
            single_group("B", Domain::Board, 1, &[("POWER", 99.0), ("TIME", 5.0)], &[]),
        ];
        PlatformIo::new(topo, groups)
    }

    #[test]
    fn test_first_group_wins() {
        let pio = platform();
        assert_eq!(pio.signal_domain_type("POWER").unwrap(), Domain::Gpu);
        assert_eq!(pio.signal_domain_type("TIME").unwrap(), Domain::Board);
        assert!(pio.signal_names().contains("TIME"));
        assert!(matches!(
            pio.signal_domain_type("MISSING"),
            Err(PlatformError::UnknownSignal(_))
        ));
    }

    #[test]
    fn test_global_handles_dedup() {
        let mut pio = platform();
        let a = pio.push_signal("POWER", Domain::Gpu, 1).unwrap();
        let b = pio.push_signal("TIME", Domain::Board, 0).unwrap();
        let c = pio.push_signal("POWER", Domain::Gpu, 1).unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
        pio.read_batch().unwrap();
        assert_eq!(pio.sample(a).unwrap(), 11.0);
        assert_eq!(pio.sample(b).unwrap(), 5.0);
        assert!(pio.sample(7).is_err());
    }

    #[test]
    fn test_read_coarser_domain_aggregates() {
        let pio = platform();
        // per-instance values are base + index, aggregated with sum
        assert_eq!(pio.read_signal("POWER", Domain::Board, 0).unwrap(), 21.0);
        assert!(pio.read_signal("POWER", Domain::Package, 0).is_err());
    }

    #[test]
    fn test_coarser_domain_index_out_of_range() {
        let mut pio = platform();
        let err = pio.read_signal("POWER", Domain::Board, 1).unwrap_err();
        assert!(matches!(
            err,
            PlatformError::Topology(TopologyError::IndexOutOfRange {
                domain: Domain::Board,
                index: 1,
                count: 1
            })
        ));
        assert_eq!(err.kind(), ErrorKind::Usage);

        let err = pio.write_control("LIMIT", Domain::Board, 1, 250.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(pio
            .save_control()
            .unwrap()
            .settings()
            .iter()
            .all(|s| s.setting != 250.0));
    }

    #[test]
    fn test_write_coarser_domain_fans_out() {
        let mut pio = platform();
        pio.write_control("LIMIT", Domain::Board, 0, 250.0).unwrap();
        let snapshot = pio.save_control().unwrap();
        assert_eq!(snapshot.settings().len(), 2);
        assert!(snapshot.settings().iter().all(|s| s.setting == 250.0));
    }

    #[test]
    fn test_restore_through_platform() {
        let mut pio = platform();
        let snapshot = SaveControl::new(vec![ControlSetting {
            name: "LIMIT".into(),
            domain: Domain::Gpu,
            domain_idx: 1,
            setting: 123.0,
        }]);
        pio.restore_control(&snapshot).unwrap();
        let saved = pio.save_control().unwrap();
        assert_eq!(saved.settings()[1].setting, 123.0);
    }

    #[test]
    fn test_factory_skips_failing_constructors() {
        let mut factory = IoGroupFactory::new();
        factory.register("BROKEN", || {
            Err(HardwareError::NotSupported("no device".into()).into())
        });
        factory.register("GOOD", || {
            Ok(single_group("GOOD", Domain::Board, 1, &[("X", 1.0)], &[]))
        });
        assert_eq!(factory.names(), vec!["BROKEN", "GOOD"]);
        let groups = factory.load();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name(), "GOOD");
        assert!(factory.build("BROKEN").unwrap().is_err());
        assert!(factory.build("MISSING").is_none());
    }
}
