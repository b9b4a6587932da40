//! Signal and control objects
//!
//! One object exists per (name, domain instance). The registry owns the
//! cached value and state flags; objects only know how to reach hardware.

use crate::error::PlatformError;
use crate::iogroup::registry::ControlId;

/// Read strategy behind a signal object
pub trait SignalSource {
    /// Register interest with a bulk transport. Called once when pushed.
    fn setup_batch(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }

    /// Value for the current batch; performs the hardware access unless a
    /// bulk transport already did.
    fn batch_value(&mut self) -> Result<f64, PlatformError> {
        self.read()
    }

    /// Immediate hardware read, independent of batching
    fn read(&self) -> Result<f64, PlatformError>;
}

/// Write strategy behind a control object
pub trait ControlSink {
    /// Register interest with a bulk transport. Called once when pushed.
    fn setup_batch(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }

    /// Write `value` to hardware
    fn write(&mut self, value: f64) -> Result<(), PlatformError>;

    /// Current hardware setting, if the control can be read back
    fn read(&self) -> Option<Result<f64, PlatformError>> {
        None
    }
}

type ReadFn = Box<dyn Fn() -> Result<f64, PlatformError>>;
type WriteFn = Box<dyn FnMut(f64) -> Result<(), PlatformError>>;

/// Signal backed by a closure
pub struct ClosureSignal {
    read: ReadFn,
}

impl ClosureSignal {
    pub fn new(read: impl Fn() -> Result<f64, PlatformError> + 'static) -> Self {
        Self {
            read: Box::new(read),
        }
    }

    /// Signal that always reports `value`
    pub fn constant(value: f64) -> Self {
        Self::new(move || Ok(value))
    }
}

impl SignalSource for ClosureSignal {
    fn read(&self) -> Result<f64, PlatformError> {
        (self.read)()
    }
}

/// Control backed by closures
pub struct ClosureControl {
    write: WriteFn,
    read: Option<ReadFn>,
}

impl ClosureControl {
    pub fn new(write: impl FnMut(f64) -> Result<(), PlatformError> + 'static) -> Self {
        Self {
            write: Box::new(write),
            read: None,
        }
    }

    /// Builder: attach a read-back function
    pub fn with_read(mut self, read: impl Fn() -> Result<f64, PlatformError> + 'static) -> Self {
        self.read = Some(Box::new(read));
        self
    }
}

impl ControlSink for ClosureControl {
    fn write(&mut self, value: f64) -> Result<(), PlatformError> {
        (self.write)(value)
    }

    fn read(&self) -> Option<Result<f64, PlatformError>> {
        self.read.as_ref().map(|read| read())
    }
}

/// Values of the control being written that activate a dependency
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    Always,
    Equals(f64),
}

/// What the dependency's current setting must satisfy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Requirement {
    Equals(f64),
    /// Dependency value must be at least the value being written
    AtLeastSetting,
    /// Dependency value must be at most the value being written
    AtMostSetting,
}

/// "Before this control takes a value matching `trigger`, `control` must
/// currently satisfy `requirement`."
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteDependency {
    pub control: ControlId,
    pub trigger: Trigger,
    pub requirement: Requirement,
}

impl WriteDependency {
    pub fn new(control: ControlId, trigger: Trigger, requirement: Requirement) -> Self {
        Self {
            control,
            trigger,
            requirement,
        }
    }

    /// True if writing `setting` requires checking the dependency
    pub fn applies_to(&self, setting: f64) -> bool {
        match self.trigger {
            Trigger::Always => true,
            Trigger::Equals(v) => setting == v,
        }
    }

    /// True if the dependency's `current` value allows writing `setting`
    pub fn is_satisfied(&self, setting: f64, current: f64) -> bool {
        match self.requirement {
            Requirement::Equals(v) => current == v,
            Requirement::AtLeastSetting => current >= setting,
            Requirement::AtMostSetting => current <= setting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_closure_control_read_back() {
        let stored = Rc::new(Cell::new(0.0));
        let writer = Rc::clone(&stored);
        let reader = Rc::clone(&stored);
        let mut control = ClosureControl::new(move |v| {
            writer.set(v);
            Ok(())
        })
        .with_read(move || Ok(reader.get()));

        control.write(7.0).unwrap();
        assert_eq!(control.read().unwrap().unwrap(), 7.0);
        assert!(ClosureControl::new(|_| Ok(())).read().is_none());
    }

    #[test]
    fn test_dependency_rules() {
        let dep = WriteDependency::new(
            ControlId::from_raw(0),
            Trigger::Equals(1.0),
            Requirement::Equals(1.0),
        );
        assert!(dep.applies_to(1.0));
        assert!(!dep.applies_to(0.0));
        assert!(dep.is_satisfied(1.0, 1.0));
        assert!(!dep.is_satisfied(1.0, 0.0));

        let ordered = WriteDependency::new(
            ControlId::from_raw(1),
            Trigger::Always,
            Requirement::AtLeastSetting,
        );
        assert!(ordered.is_satisfied(2.0e9, 3.0e9));
        assert!(!ordered.is_satisfied(2.0e9, 1.0e9));
    }
}
