//! Output formatting utilities
//!
//! Provides table and JSON output formatting for CLI commands.

use crate::cli::args::OutputFormat;
use serde::Serialize;
use std::io::{self, Write};

/// Format and print output based on the selected format
pub fn print_output<T: Serialize + TableDisplay>(data: &T, format: OutputFormat) -> io::Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();

    match format {
        OutputFormat::Table => {
            writeln!(handle, "{}", data.to_table())?;
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string());
            writeln!(handle, "{}", json)?;
        }
        OutputFormat::Compact => {
            writeln!(handle, "{}", data.to_compact())?;
        }
    }

    Ok(())
}

/// Trait for types that can be displayed as a table
pub trait TableDisplay {
    /// Format as a table string
    fn to_table(&self) -> String;

    /// Format as a compact single line
    fn to_compact(&self) -> String {
        self.to_table().replace('\n', " | ")
    }
}

/// Sorted signal or control names
#[derive(Debug, Clone, Serialize)]
pub struct NameList {
    pub names: Vec<String>,
}

impl TableDisplay for NameList {
    fn to_table(&self) -> String {
        self.names.join("\n")
    }

    fn to_compact(&self) -> String {
        self.names.join(",")
    }
}

/// Description of one signal or control
#[derive(Debug, Clone, Serialize)]
pub struct NameInfo {
    pub name: String,
    pub description: String,
}

impl TableDisplay for NameInfo {
    fn to_table(&self) -> String {
        format!("{}:\n{}", self.name, self.description)
    }

    fn to_compact(&self) -> String {
        let fields: Vec<&str> = self.description.lines().map(str::trim).collect();
        format!("{}: {}", self.name, fields.join("; "))
    }
}

/// One value read from a signal
#[derive(Debug, Clone, Serialize)]
pub struct SignalValue {
    pub name: String,
    pub domain: String,
    pub index: usize,
    pub value: f64,
    /// Value rendered in the signal's format
    pub formatted: String,
}

impl TableDisplay for SignalValue {
    fn to_table(&self) -> String {
        self.formatted.clone()
    }

    fn to_compact(&self) -> String {
        format!("{}@{}-{}={}", self.name, self.domain, self.index, self.formatted)
    }
}

/// Instance count of one domain
#[derive(Debug, Clone, Serialize)]
pub struct DomainCount {
    pub domain: String,
    pub count: usize,
}

/// Instance counts of every domain
#[derive(Debug, Clone, Serialize)]
pub struct DomainTable {
    pub domains: Vec<DomainCount>,
}

impl TableDisplay for DomainTable {
    fn to_table(&self) -> String {
        self.domains
            .iter()
            .map(|d| format!("{:<10}{}", d.domain, d.count))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn to_compact(&self) -> String {
        self.domains
            .iter()
            .map(|d| format!("{}={}", d.domain, d.count))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// One monitor sample row
#[derive(Debug, Clone, Serialize)]
pub struct SampleRow {
    pub headers: Vec<String>,
    pub values: Vec<String>,
}

impl TableDisplay for SampleRow {
    fn to_table(&self) -> String {
        self.values.join("\t")
    }

    fn to_compact(&self) -> String {
        self.values.join(",")
    }
}

/// Simple message output
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub message: String,
    pub success: bool,
}

impl TableDisplay for Message {
    fn to_table(&self) -> String {
        if self.success {
            format!("✓ {}", self.message)
        } else {
            format!("✗ {}", self.message)
        }
    }
}
