//! Save and restore commands

use crate::cli::args::OutputFormat;
use crate::cli::output::{print_output, Message};
use crate::error::Result;
use crate::iogroup::{PlatformIo, SaveControl};

use std::path::Path;

/// Execute the save command
pub fn run_save(platform: &PlatformIo, path: &Path, format: OutputFormat) -> Result<()> {
    let snapshot = platform.save_control()?;
    snapshot.write_json(path)?;
    print_output(
        &Message {
            message: format!(
                "Saved {} control setting(s) to {}",
                snapshot.settings().len(),
                path.display()
            ),
            success: true,
        },
        format,
    )?;
    Ok(())
}

/// Execute the restore command
pub fn run_restore(platform: &mut PlatformIo, path: &Path, format: OutputFormat, dry_run: bool) -> Result<()> {
    let snapshot = SaveControl::read_json(path)?;
    let message = if dry_run {
        format!(
            "[DRY RUN] Would restore {} control setting(s) from {}",
            snapshot.settings().len(),
            path.display()
        )
    } else {
        platform.restore_control(&snapshot)?;
        format!(
            "Restored {} control setting(s) from {}",
            snapshot.settings().len(),
            path.display()
        )
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
