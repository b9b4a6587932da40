//! Batch write command
//!
//! Pushes every control named in the input, adjusts them, and applies them
//! with a single `write_batch`.

use crate::cli::args::OutputFormat;
use crate::cli::output::{print_output, Message};
use crate::error::{AppError, Result};
use crate::iogroup::PlatformIo;
use crate::topo::Domain;

use std::io::Read;

/// One `NAME DOMAIN IDX VALUE` line
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub name: String,
    pub domain: Domain,
    pub index: usize,
    pub value: f64,
}

/// Parse batch input; blank lines and `#` comments are skipped
pub fn parse_batch(input: &str) -> Result<Vec<BatchEntry>> {
    let mut entries = Vec::new();
    for (lineno, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let invalid = |what: &str| AppError::InvalidInput(format!("line {}: {}: {:?}", lineno + 1, what, line));
        let fields: Vec<&str> = line.split_whitespace().collect();
        let &[name, domain, index, value] = fields.as_slice() else {
            return Err(invalid("expected NAME DOMAIN IDX VALUE"));
        };
        entries.push(BatchEntry {
            name: name.to_string(),
            domain: domain.parse().map_err(|_| invalid("unknown domain"))?,
            index: index.parse().map_err(|_| invalid("bad domain index"))?,
            value: value.parse().map_err(|_| invalid("bad value"))?,
        });
    }
    Ok(entries)
}

/// Push and adjust every entry, then write once unless `dry_run`
pub fn apply_batch(platform: &mut PlatformIo, entries: &[BatchEntry], dry_run: bool) -> Result<usize> {
    for entry in entries {
        let handle = platform.push_control(&entry.name, entry.domain, entry.index)?;
        platform.adjust(handle, entry.value)?;
    }
    if !dry_run {
        platform.write_batch()?;
    }
    Ok(entries.len())
}

fn read_input(file: &str) -> Result<String> {
    if file == "-" {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        Ok(input)
    } else {
        Ok(std::fs::read_to_string(file)?)
    }
}

/// Execute the batch command
pub fn run_batch(platform: &mut PlatformIo, file: &str, format: OutputFormat, dry_run: bool) -> Result<()> {
    let entries = parse_batch(&read_input(file)?)?;
    let count = apply_batch(platform, &entries, dry_run)?;
    let message = if dry_run {
        format!("[DRY RUN] Would write {} control setting(s)", count)
    } else {
        format!("Wrote {} control setting(s)", count)
    };
    print_output(
        &Message {
            message,
            success: true,
        },
        format,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::mock::{cpu_topo, single_group};

    fn platform() -> PlatformIo {
        let group = single_group("FAKE", Domain::Core, 2, &[], &["LIMIT"]);
        PlatformIo::new(cpu_topo(1, 2, 1), vec![group])
    }

    fn settings(platform: &PlatformIo) -> Vec<f64> {
        platform
            .save_control()
            .unwrap()
            .settings()
            .iter()
            .map(|s| s.setting)
            .collect()
    }

    #[test]
    fn test_parse_batch() {
        let entries = parse_batch("# limits\nLIMIT core 0 1.5e9\n\n  LIMIT CORE 1 -2\n").unwrap();
        assert_eq!(
            entries,
            vec![
                BatchEntry {
                    name: "LIMIT".to_string(),
                    domain: Domain::Core,
                    index: 0,
                    value: 1.5e9,
                },
                BatchEntry {
                    name: "LIMIT".to_string(),
                    domain: Domain::Core,
                    index: 1,
                    value: -2.0,
                },
            ]
        );
    }

    #[test]
    fn test_parse_batch_errors() {
        for input in ["LIMIT core 0", "LIMIT socket 0 1", "LIMIT core x 1", "LIMIT core 0 fast"] {
            let err = parse_batch(input).unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(ref m) if m.starts_with("line 1")));
        }
    }

    #[test]
    fn test_apply_batch() {
        let mut platform = platform();
        let entries = parse_batch("LIMIT core 0 3\nLIMIT core 1 4\n").unwrap();
        assert_eq!(apply_batch(&mut platform, &entries, false).unwrap(), 2);
        assert_eq!(settings(&platform), vec![3.0, 4.0]);
    }

    #[test]
    fn test_apply_batch_dry_run() {
        let mut platform = platform();
        let entries = parse_batch("LIMIT core 1 4\n").unwrap();
        apply_batch(&mut platform, &entries, true).unwrap();
        assert_eq!(settings(&platform), vec![0.0, 0.0]);
    }

    #[test]
    fn test_apply_batch_unknown_control() {
        let mut platform = platform();
        let entries = parse_batch("MISSING core 0 1\n").unwrap();
        assert!(matches!(
            apply_batch(&mut platform, &entries, false),
            Err(AppError::Platform(PlatformError::UnknownControl(_)))
        ));
    }
}
