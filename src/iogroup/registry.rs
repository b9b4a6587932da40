//! Push/dedup registry and batch executor
//!
//! [`BatchRegistry`] owns every signal and control object of one IoGroup in
//! arenas addressed by [`SignalId`] / [`ControlId`]. Names (canonical and
//! aliases) map to per-instance id vectors, so aliasing never duplicates
//! state and deduplication compares ids.

use crate::error::{HardwareError, PlatformError};
use crate::iogroup::descriptor::{describe, ControlInfo, SignalInfo};
use crate::iogroup::object::{ControlSink, SignalSource, WriteDependency};
use crate::iogroup::save::ControlSetting;
use crate::topo::Domain;

use std::collections::{BTreeMap, BTreeSet};

/// Arena index of a signal object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(usize);

/// Arena index of a control object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlId(usize);

impl ControlId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: usize) -> Self {
        ControlId(raw)
    }
}

/// Bulk transaction run once at the start of every `read_batch()`
pub trait BatchTransport {
    fn read_batch(&self) -> Result<(), PlatformError>;
}

struct SignalSlot {
    source: Box<dyn SignalSource>,
    value: f64,
    sampled: bool,
}

struct ControlSlot {
    sink: Box<dyn ControlSink>,
    setting: f64,
    dirty: bool,
    dependency: Option<WriteDependency>,
}

struct SignalEntry {
    info: SignalInfo,
    objects: Vec<SignalId>,
    alias_for: Option<String>,
}

struct ControlEntry {
    info: ControlInfo,
    objects: Vec<ControlId>,
    alias_for: Option<String>,
}

/// Signal/control tables plus batch state for one IoGroup
pub struct BatchRegistry {
    signals: Vec<SignalSlot>,
    controls: Vec<ControlSlot>,
    signal_table: BTreeMap<String, SignalEntry>,
    control_table: BTreeMap<String, ControlEntry>,
    pushed_signals: Vec<SignalId>,
    pushed_controls: Vec<ControlId>,
    is_batch_read: bool,
    transport: Option<Box<dyn BatchTransport>>,
}

impl Default for BatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self {
            signals: Vec::new(),
            controls: Vec::new(),
            signal_table: BTreeMap::new(),
            control_table: BTreeMap::new(),
            pushed_signals: Vec::new(),
            pushed_controls: Vec::new(),
            is_batch_read: false,
            transport: None,
        }
    }

    /// Builder: run `transport` before collecting batch values
    pub fn with_transport(mut self, transport: Box<dyn BatchTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    // Table construction

    /// Register a signal name with one object per domain instance
    pub fn add_signal(
        &mut self,
        name: &str,
        info: SignalInfo,
        sources: Vec<Box<dyn SignalSource>>,
    ) -> Result<Vec<SignalId>, PlatformError> {
        if self.signal_table.contains_key(name) {
            return Err(PlatformError::AliasConflict(name.to_string()));
        }
        let ids: Vec<SignalId> = sources
            .into_iter()
            .map(|source| {
                self.signals.push(SignalSlot {
                    source,
                    value: f64::NAN,
                    sampled: false,
                });
                SignalId(self.signals.len() - 1)
            })
            .collect();
        self.signal_table.insert(
            name.to_string(),
            SignalEntry {
                info,
                objects: ids.clone(),
                alias_for: None,
            },
        );
        Ok(ids)
    }

    /// Register `alias` for the objects of `target`
    ///
    /// Returns `Ok(false)` without registering anything when `target` is
    /// absent (for example after pruning unreadable signals).
    pub fn add_signal_alias(&mut self, alias: &str, target: &str) -> Result<bool, PlatformError> {
        if self.signal_table.contains_key(alias) {
            return Err(PlatformError::AliasConflict(alias.to_string()));
        }
        let Some(entry) = self.signal_table.get(target) else {
            return Ok(false);
        };
        let canonical = entry.alias_for.clone().unwrap_or_else(|| target.to_string());
        let aliased = SignalEntry {
            info: entry.info.clone(),
            objects: entry.objects.clone(),
            alias_for: Some(canonical),
        };
        self.signal_table.insert(alias.to_string(), aliased);
        Ok(true)
    }

    /// Register a control name with one object per domain instance
    pub fn add_control(
        &mut self,
        name: &str,
        info: ControlInfo,
        sinks: Vec<Box<dyn ControlSink>>,
    ) -> Result<Vec<ControlId>, PlatformError> {
        if self.control_table.contains_key(name) {
            return Err(PlatformError::AliasConflict(name.to_string()));
        }
        let ids: Vec<ControlId> = sinks
            .into_iter()
            .map(|sink| {
                self.controls.push(ControlSlot {
                    sink,
                    setting: f64::NAN,
                    dirty: false,
                    dependency: None,
                });
                ControlId(self.controls.len() - 1)
            })
            .collect();
        self.control_table.insert(
            name.to_string(),
            ControlEntry {
                info,
                objects: ids.clone(),
                alias_for: None,
            },
        );
        Ok(ids)
    }

    /// Register `alias` for the objects of control `target`
    pub fn add_control_alias(&mut self, alias: &str, target: &str) -> Result<bool, PlatformError> {
        if self.control_table.contains_key(alias) {
            return Err(PlatformError::AliasConflict(alias.to_string()));
        }
        let Some(entry) = self.control_table.get(target) else {
            return Ok(false);
        };
        let canonical = entry.alias_for.clone().unwrap_or_else(|| target.to_string());
        let aliased = ControlEntry {
            info: entry.info.clone(),
            objects: entry.objects.clone(),
            alias_for: Some(canonical),
        };
        self.control_table.insert(alias.to_string(), aliased);
        Ok(true)
    }

    /// Declare that writes to `control` depend on another control
    pub fn set_write_dependency(
        &mut self,
        control: ControlId,
        dependency: WriteDependency,
    ) -> Result<(), PlatformError> {
        if dependency.control.0 >= self.controls.len() {
            return Err(PlatformError::Consistency(format!(
                "write dependency on unknown control object {}",
                dependency.control.0
            )));
        }
        let slot = self.controls.get_mut(control.0).ok_or_else(|| {
            PlatformError::Consistency(format!("unknown control object {}", control.0))
        })?;
        slot.dependency = Some(dependency);
        Ok(())
    }

    /// Remove a signal name (and any alias of it)
    pub fn remove_signal(&mut self, name: &str) {
        self.signal_table
            .retain(|key, entry| key != name && entry.alias_for.as_deref() != Some(name));
    }

    /// Remove a control name (and any alias of it)
    pub fn remove_control(&mut self, name: &str) {
        self.control_table
            .retain(|key, entry| key != name && entry.alias_for.as_deref() != Some(name));
    }

    /// Read every instance of every signal once and drop names whose read
    /// fails with a hardware error. Returns the pruned names.
    pub fn prune_unreadable_signals(&mut self) -> Vec<String> {
        let mut pruned = Vec::new();
        for (name, entry) in &self.signal_table {
            if entry.alias_for.is_some() {
                continue;
            }
            for id in &entry.objects {
                if let Err(e) = self.signals[id.0].source.read() {
                    log::debug!("Pruning signal {}: {}", name, e);
                    pruned.push(name.clone());
                    break;
                }
            }
        }
        for name in &pruned {
            self.remove_signal(name);
        }
        pruned
    }

    // Queries

    pub fn signal_names(&self) -> BTreeSet<String> {
        self.signal_table.keys().cloned().collect()
    }

    pub fn control_names(&self) -> BTreeSet<String> {
        self.control_table.keys().cloned().collect()
    }

    pub fn is_valid_signal(&self, name: &str) -> bool {
        self.signal_table.contains_key(name)
    }

    pub fn is_valid_control(&self, name: &str) -> bool {
        self.control_table.contains_key(name)
    }

    pub fn signal_info(&self, name: &str) -> Result<&SignalInfo, PlatformError> {
        self.signal_table
            .get(name)
            .map(|e| &e.info)
            .ok_or_else(|| PlatformError::UnknownSignal(name.to_string()))
    }

    pub fn control_info(&self, name: &str) -> Result<&ControlInfo, PlatformError> {
        self.control_table
            .get(name)
            .map(|e| &e.info)
            .ok_or_else(|| PlatformError::UnknownControl(name.to_string()))
    }

    /// Canonical name behind a signal alias
    pub fn signal_alias_target(&self, name: &str) -> Option<&str> {
        self.signal_table.get(name)?.alias_for.as_deref()
    }

    /// Canonical name behind a control alias
    pub fn control_alias_target(&self, name: &str) -> Option<&str> {
        self.control_table.get(name)?.alias_for.as_deref()
    }

    /// Object ids behind a signal name
    pub fn signal_objects(&self, name: &str) -> Option<&[SignalId]> {
        self.signal_table.get(name).map(|e| e.objects.as_slice())
    }

    /// Object ids behind a control name
    pub fn control_objects(&self, name: &str) -> Option<&[ControlId]> {
        self.control_table.get(name).map(|e| e.objects.as_slice())
    }

    pub fn signal_description(&self, name: &str, iogroup: &str) -> Result<String, PlatformError> {
        let entry = self
            .signal_table
            .get(name)
            .ok_or_else(|| PlatformError::UnknownSignal(name.to_string()))?;
        let info = &entry.info;
        Ok(describe(
            &info.description,
            info.units,
            info.aggregation,
            info.domain,
            iogroup,
            entry.alias_for.as_deref(),
        ))
    }

    pub fn control_description(&self, name: &str, iogroup: &str) -> Result<String, PlatformError> {
        let entry = self
            .control_table
            .get(name)
            .ok_or_else(|| PlatformError::UnknownControl(name.to_string()))?;
        let info = &entry.info;
        Ok(describe(
            &info.description,
            info.units,
            info.aggregation,
            info.domain,
            iogroup,
            entry.alias_for.as_deref(),
        ))
    }

    fn resolve_signal(
        &self,
        name: &str,
        domain: Domain,
        index: usize,
    ) -> Result<SignalId, PlatformError> {
        let entry = self
            .signal_table
            .get(name)
            .ok_or_else(|| PlatformError::UnknownSignal(name.to_string()))?;
        if entry.info.domain != domain {
            return Err(PlatformError::WrongDomain {
                name: name.to_string(),
                expected: entry.info.domain,
                actual: domain,
            });
        }
        entry
            .objects
            .get(index)
            .copied()
            .ok_or(PlatformError::IndexOutOfRange {
                domain,
                index,
                count: entry.objects.len(),
            })
    }

    fn resolve_control(
        &self,
        name: &str,
        domain: Domain,
        index: usize,
    ) -> Result<ControlId, PlatformError> {
        let entry = self
            .control_table
            .get(name)
            .ok_or_else(|| PlatformError::UnknownControl(name.to_string()))?;
        if entry.info.domain != domain {
            return Err(PlatformError::WrongDomain {
                name: name.to_string(),
                expected: entry.info.domain,
                actual: domain,
            });
        }
        entry
            .objects
            .get(index)
            .copied()
            .ok_or(PlatformError::IndexOutOfRange {
                domain,
                index,
                count: entry.objects.len(),
            })
    }

    // Push phase

    /// Register interest in a signal and return its batch handle
    pub fn push_signal(
        &mut self,
        name: &str,
        domain: Domain,
        index: usize,
    ) -> Result<usize, PlatformError> {
        let id = self.resolve_signal(name, domain, index)?;
        if self.is_batch_read {
            return Err(PlatformError::PushAfterRead);
        }
        if let Some(handle) = self.pushed_signals.iter().position(|p| *p == id) {
            return Ok(handle);
        }
        self.signals[id.0].source.setup_batch()?;
        self.pushed_signals.push(id);
        Ok(self.pushed_signals.len() - 1)
    }

    /// Register interest in a control and return its batch handle
    pub fn push_control(
        &mut self,
        name: &str,
        domain: Domain,
        index: usize,
    ) -> Result<usize, PlatformError> {
        let id = self.resolve_control(name, domain, index)?;
        if self.is_batch_read {
            return Err(PlatformError::PushAfterRead);
        }
        if !self.control_info(name)?.batchable {
            return Err(PlatformError::NotBatchable(name.to_string()));
        }
        if let Some(handle) = self.pushed_controls.iter().position(|p| *p == id) {
            return Ok(handle);
        }
        self.controls[id.0].sink.setup_batch()?;
        self.pushed_controls.push(id);
        Ok(self.pushed_controls.len() - 1)
    }

    pub fn num_pushed_signals(&self) -> usize {
        self.pushed_signals.len()
    }

    pub fn num_pushed_controls(&self) -> usize {
        self.pushed_controls.len()
    }

    // Batch phase

    /// Refresh every pushed signal from hardware
    pub fn read_batch(&mut self) -> Result<(), PlatformError> {
        self.is_batch_read = true;
        if !self.pushed_signals.is_empty() {
            if let Some(transport) = &self.transport {
                transport.read_batch()?;
            }
        }
        let signals = &mut self.signals;
        let values = self
            .pushed_signals
            .iter()
            .map(|id| signals[id.0].source.batch_value())
            .collect::<Result<Vec<_>, _>>()?;
        for (id, value) in self.pushed_signals.iter().zip(values) {
            let slot = &mut self.signals[id.0];
            slot.value = value;
            slot.sampled = true;
        }
        log::debug!("read_batch: {} signals", self.pushed_signals.len());
        Ok(())
    }

    /// Write every adjusted control, retrying failed writes once
    pub fn write_batch(&mut self) -> Result<(), PlatformError> {
        let dirty: Vec<ControlId> = self
            .pushed_controls
            .iter()
            .copied()
            .filter(|id| self.controls[id.0].dirty)
            .collect();
        let mut deferred = Vec::new();
        for id in dirty {
            let setting = self.controls[id.0].setting;
            match self.write_object(id, setting) {
                Ok(()) => self.controls[id.0].dirty = false,
                Err(PlatformError::Hardware(e)) => {
                    log::debug!("Deferring write of control object {}: {}", id.0, e);
                    deferred.push(id);
                }
                Err(e) => return Err(e),
            }
        }
        for id in deferred {
            let setting = self.controls[id.0].setting;
            self.write_object(id, setting)?;
            self.controls[id.0].dirty = false;
        }
        Ok(())
    }

    fn write_object(&mut self, id: ControlId, setting: f64) -> Result<(), PlatformError> {
        if let Some(dep) = self.controls[id.0].dependency {
            if dep.applies_to(setting) {
                let current = match self.controls[dep.control.0].sink.read() {
                    Some(value) => value?,
                    None => {
                        return Err(PlatformError::Consistency(format!(
                            "write dependency on control object {} which cannot be read",
                            dep.control.0
                        )))
                    }
                };
                if !dep.is_satisfied(setting, current) {
                    return Err(HardwareError::PreconditionUnmet(format!(
                        "setting {} requires dependent control at {} to change first",
                        setting, current
                    ))
                    .into());
                }
            }
        }
        self.controls[id.0].sink.write(setting)
    }

    /// Value of a pushed signal from the last `read_batch()`
    pub fn sample(&self, handle: usize) -> Result<f64, PlatformError> {
        let id = self
            .pushed_signals
            .get(handle)
            .ok_or(PlatformError::BatchIndexOutOfRange(handle))?;
        let slot = &self.signals[id.0];
        if !slot.sampled {
            return Err(PlatformError::SampleBeforeRead);
        }
        Ok(slot.value)
    }

    /// Stage a new setting for a pushed control
    pub fn adjust(&mut self, handle: usize, setting: f64) -> Result<(), PlatformError> {
        let id = self
            .pushed_controls
            .get(handle)
            .copied()
            .ok_or(PlatformError::BatchIndexOutOfRange(handle))?;
        let slot = &mut self.controls[id.0];
        slot.setting = setting;
        slot.dirty = true;
        Ok(())
    }

    // Immediate access

    pub fn read_signal(&self, name: &str, domain: Domain, index: usize) -> Result<f64, PlatformError> {
        let id = self.resolve_signal(name, domain, index)?;
        self.signals[id.0].source.read()
    }

    pub fn write_control(
        &mut self,
        name: &str,
        domain: Domain,
        index: usize,
        setting: f64,
    ) -> Result<(), PlatformError> {
        let id = self.resolve_control(name, domain, index)?;
        self.write_object(id, setting)
    }

    /// Current setting of every canonical control that supports read-back
    pub fn current_settings(&self) -> Vec<ControlSetting> {
        let mut settings = Vec::new();
        for (name, entry) in &self.control_table {
            if entry.alias_for.is_some() {
                continue;
            }
            for (index, id) in entry.objects.iter().enumerate() {
                match self.controls[id.0].sink.read() {
                    Some(Ok(value)) => settings.push(ControlSetting {
                        name: name.clone(),
                        domain: entry.info.domain,
                        domain_idx: index,
                        setting: value,
                    }),
                    Some(Err(e)) => log::debug!("Not saving {}[{}]: {}", name, index, e),
                    None => {}
                }
            }
        }
        settings
    }
}
