//! Signal and control listing
//!
//! Lists every name the loaded backends provide, or describes one.

use crate::cli::args::OutputFormat;
use crate::cli::output::{print_output, NameInfo, NameList};
use crate::error::{PlatformError, Result};
use crate::iogroup::PlatformIo;

/// Execute the signals command
pub fn run_signals(platform: &PlatformIo, info: Option<&str>, format: OutputFormat) -> Result<()> {
    match info {
        Some(name) => print_output(&signal_info(platform, name)?, format)?,
        None => print_output(
            &NameList {
                names: platform.signal_names().into_iter().collect(),
            },
            format,
        )?,
    }
    Ok(())
}

/// Execute the controls command
pub fn run_controls(platform: &PlatformIo, info: Option<&str>, format: OutputFormat) -> Result<()> {
    match info {
        Some(name) => print_output(&control_info(platform, name)?, format)?,
        None => print_output(
            &NameList {
                names: platform.control_names().into_iter().collect(),
            },
            format,
        )?,
    }
    Ok(())
}

fn signal_info(platform: &PlatformIo, name: &str) -> std::result::Result<NameInfo, PlatformError> {
    Ok(NameInfo {
        name: name.to_string(),
        description: platform.signal_description(name)?,
    })
}

fn control_info(platform: &PlatformIo, name: &str) -> std::result::Result<NameInfo, PlatformError> {
    Ok(NameInfo {
        name: name.to_string(),
        description: platform.control_description(name)?,
    })
}
