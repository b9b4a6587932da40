//! Batched signal/control plugin interface
//!
//! Each hardware backend implements [`IoGroup`] over a [`BatchRegistry`].
//! Callers push the (name, domain, index) triples they care about, run one
//! `read_batch()`/`write_batch()` per control interval and exchange values
//! through `sample()`/`adjust()` in between.

pub mod agg;
pub mod descriptor;
pub mod field;
pub mod object;
pub mod platform;
pub mod registry;
pub mod save;

pub use agg::{Aggregation, MonotoneMax};
pub use descriptor::{Behavior, ControlInfo, Format, SignalInfo, Units};
pub use platform::{IoGroupFactory, PlatformIo};
pub use registry::{BatchRegistry, ControlId, SignalId};
pub use save::{ControlSetting, SaveControl};

use crate::error::PlatformError;
use crate::topo::Domain;

use std::collections::BTreeSet;

/// A backend exposing named signals and controls
///
/// Implementors provide access to their registry; every other operation has
/// a default that delegates to it.
pub trait IoGroup {
    /// Short backend name, e.g. `NVML`
    fn name(&self) -> &str;

    fn registry(&self) -> &BatchRegistry;

    fn registry_mut(&mut self) -> &mut BatchRegistry;

    fn signal_names(&self) -> BTreeSet<String> {
        self.registry().signal_names()
    }

    fn control_names(&self) -> BTreeSet<String> {
        self.registry().control_names()
    }

    fn is_valid_signal(&self, name: &str) -> bool {
        self.registry().is_valid_signal(name)
    }

    fn is_valid_control(&self, name: &str) -> bool {
        self.registry().is_valid_control(name)
    }

    fn signal_domain_type(&self, name: &str) -> Option<Domain> {
        self.registry().signal_info(name).ok().map(|i| i.domain)
    }

    fn control_domain_type(&self, name: &str) -> Option<Domain> {
        self.registry().control_info(name).ok().map(|i| i.domain)
    }

    fn push_signal(&mut self, name: &str, domain: Domain, index: usize) -> Result<usize, PlatformError> {
        self.registry_mut().push_signal(name, domain, index)
    }

    fn push_control(&mut self, name: &str, domain: Domain, index: usize) -> Result<usize, PlatformError> {
        self.registry_mut().push_control(name, domain, index)
    }

    fn read_batch(&mut self) -> Result<(), PlatformError> {
        self.registry_mut().read_batch()
    }

    fn write_batch(&mut self) -> Result<(), PlatformError> {
        self.registry_mut().write_batch()
    }

    fn sample(&self, handle: usize) -> Result<f64, PlatformError> {
        self.registry().sample(handle)
    }

    fn adjust(&mut self, handle: usize, setting: f64) -> Result<(), PlatformError> {
        self.registry_mut().adjust(handle, setting)
    }

    fn read_signal(&self, name: &str, domain: Domain, index: usize) -> Result<f64, PlatformError> {
        self.registry().read_signal(name, domain, index)
    }

    fn write_control(
        &mut self,
        name: &str,
        domain: Domain,
        index: usize,
        setting: f64,
    ) -> Result<(), PlatformError> {
        self.registry_mut().write_control(name, domain, index, setting)
    }

    /// Aggregation of a signal or control
    fn aggregation(&self, name: &str) -> Result<Aggregation, PlatformError> {
        let registry = self.registry();
        match registry.signal_info(name) {
            Ok(info) => Ok(info.aggregation),
            Err(_) => registry.control_info(name).map(|i| i.aggregation),
        }
    }

    fn format(&self, name: &str) -> Result<Format, PlatformError> {
        self.registry().signal_info(name).map(|i| i.format)
    }

    fn signal_behavior(&self, name: &str) -> Result<Behavior, PlatformError> {
        self.registry().signal_info(name).map(|i| i.behavior)
    }

    fn signal_description(&self, name: &str) -> Result<String, PlatformError> {
        self.registry().signal_description(name, self.name())
    }

    fn control_description(&self, name: &str) -> Result<String, PlatformError> {
        self.registry().control_description(name, self.name())
    }

    /// Settings to capture before the session changes anything
    fn save_settings(&self) -> Result<Vec<ControlSetting>, PlatformError> {
        Ok(self.registry().current_settings())
    }
}

impl save::ControlWriter for dyn IoGroup + '_ {
    fn write_control(
        &mut self,
        name: &str,
        domain: Domain,
        domain_idx: usize,
        setting: f64,
    ) -> Result<(), PlatformError> {
        IoGroup::write_control(self, name, domain, domain_idx, setting)
    }
}
