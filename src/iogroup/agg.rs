//! Aggregation functions
//!
//! Metadata describing how per-instance values roll up into a coarser
//! domain. The batch layer never applies these itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How to combine values from several domain instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Average,
    Min,
    Max,
    /// Bitwise OR of the values truncated to integers
    IntegerBitwiseOr,
    /// 1.0 if any value is non-zero
    LogicalOr,
    /// 1.0 if every value is non-zero
    LogicalAnd,
    /// The common value, or NaN if the values differ
    ExpectSame,
    /// The first value
    SelectFirst,
    /// Running maximum of successive samples of a counter, skipping NaN
    MaxMonotone,
}

impl Aggregation {
    /// Name as shown in descriptions
    pub fn name(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Average => "average",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::IntegerBitwiseOr => "integer_bitwise_or",
            Aggregation::LogicalOr => "logical_or",
            Aggregation::LogicalAnd => "logical_and",
            Aggregation::ExpectSame => "expect_same",
            Aggregation::SelectFirst => "select_first",
            Aggregation::MaxMonotone => "max_monotone",
        }
    }

    /// Combine `values`; an empty slice yields NaN (0.0 for `Sum`)
    pub fn apply(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return match self {
                Aggregation::Sum => 0.0,
                _ => f64::NAN,
            };
        }
        match self {
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Average => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregation::IntegerBitwiseOr => {
                values.iter().fold(0u64, |acc, v| acc | (*v as u64)) as f64
            }
            Aggregation::LogicalOr => {
                if values.iter().any(|v| *v != 0.0) {
                    1.0
                } else {
                    0.0
                }
            }
            Aggregation::LogicalAnd => {
                if values.iter().all(|v| *v != 0.0) {
                    1.0
                } else {
                    0.0
                }
            }
            Aggregation::ExpectSame => {
                let first = values[0];
                if values.iter().all(|v| *v == first) {
                    first
                } else {
                    f64::NAN
                }
            }
            Aggregation::SelectFirst => values[0],
            Aggregation::MaxMonotone => {
                let mut running = MonotoneMax::default();
                for &value in values {
                    running.update(value);
                }
                running.value()
            }
        }
    }
}

/// Value of a counter that is never allowed to go backwards
///
/// Samples below the current maximum are ignored, as are NaN samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonotoneMax {
    current: f64,
}

impl Default for MonotoneMax {
    fn default() -> Self {
        Self { current: f64::NAN }
    }
}

impl MonotoneMax {
    /// Fold in the next sample and return the running maximum
    pub fn update(&mut self, sample: f64) -> f64 {
        if !sample.is_nan() && (self.current.is_nan() || sample > self.current) {
            self.current = sample;
        }
        self.current
    }

    /// Running maximum so far; NaN before the first valid sample
    pub fn value(&self) -> f64 {
        self.current
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
