//! Signal and control metadata

use crate::iogroup::agg::Aggregation;
use crate::topo::Domain;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical units of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Units {
    None,
    Seconds,
    Hertz,
    Watts,
    Joules,
    Celsius,
    BytesPerSecond,
}

impl Units {
    pub fn name(&self) -> &'static str {
        match self {
            Units::None => "none",
            Units::Seconds => "seconds",
            Units::Hertz => "hertz",
            Units::Watts => "watts",
            Units::Joules => "joules",
            Units::Celsius => "celsius",
            Units::BytesPerSecond => "bytes_per_second",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a signal evolves over time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    /// Never changes after boot
    Constant,
    /// Only ever increases (counters)
    Monotone,
    /// Changes arbitrarily
    Variable,
    /// Encodes a category, not a quantity
    Label,
}

impl Behavior {
    pub fn name(&self) -> &'static str {
        match self {
            Behavior::Constant => "constant",
            Behavior::Monotone => "monotone",
            Behavior::Variable => "variable",
            Behavior::Label => "label",
        }
    }
}

/// How to render a value as text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Double,
    Integer,
    Hex,
}

impl Format {
    /// Render `value`; NaN renders as `NAN` in every format
    pub fn format(&self, value: f64) -> String {
        if value.is_nan() {
            return "NAN".to_string();
        }
        match self {
            Format::Double => format!("{}", value),
            Format::Integer => format!("{}", value as i64),
            Format::Hex => format!("0x{:016x}", value as u64),
        }
    }
}

/// Metadata for one signal name
#[derive(Debug, Clone, PartialEq)]
pub struct SignalInfo {
    pub domain: Domain,
    pub units: Units,
    pub aggregation: Aggregation,
    pub behavior: Behavior,
    pub format: Format,
    pub description: String,
}

impl SignalInfo {
    /// Double-formatted signal with the given metadata
    pub fn new(
        domain: Domain,
        units: Units,
        aggregation: Aggregation,
        behavior: Behavior,
        description: impl Into<String>,
    ) -> Self {
        Self {
            domain,
            units,
            aggregation,
            behavior,
            format: Format::Double,
            description: description.into(),
        }
    }

    /// Builder: set format
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }
}

/// Metadata for one control name
#[derive(Debug, Clone, PartialEq)]
pub struct ControlInfo {
    pub domain: Domain,
    pub units: Units,
    pub aggregation: Aggregation,
    pub description: String,
    /// False for controls that may only be written immediately
    pub batchable: bool,
}

impl ControlInfo {
    pub fn new(
        domain: Domain,
        units: Units,
        aggregation: Aggregation,
        description: impl Into<String>,
    ) -> Self {
        Self {
            domain,
            units,
            aggregation,
            description: description.into(),
            batchable: true,
        }
    }

    /// Builder: mark as write-immediately only
    pub fn immediate_only(mut self) -> Self {
        self.batchable = false;
        self
    }
}

/// Multi-line description block shared by signals and controls
pub fn describe(
    description: &str,
    units: Units,
    aggregation: Aggregation,
    domain: Domain,
    iogroup: &str,
    alias_for: Option<&str>,
) -> String {
    let mut text = format!(
        "    description: {}\n    units: {}\n    aggregation: {}\n    domain: {}\n    iogroup: {}",
        description, units, aggregation, domain, iogroup
    );
    if let Some(target) = alias_for {
        text.push_str(&format!("\n    alias_for: {}", target));
    }
    text
}
