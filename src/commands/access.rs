//! Immediate read and write commands

use crate::cli::args::{OutputFormat, TargetArgs};
use crate::cli::output::{print_output, Message, SignalValue};
use crate::error::{PlatformError, Result};
use crate::iogroup::PlatformIo;

/// Execute the read command
pub fn run_read(platform: &PlatformIo, target: &TargetArgs, format: OutputFormat) -> Result<()> {
    print_output(&read_value(platform, target)?, format)?;
    Ok(())
}

/// Execute the write command
pub fn run_write(
    platform: &mut PlatformIo,
    target: &TargetArgs,
    value: f64,
    format: OutputFormat,
    dry_run: bool,
) -> Result<()> {
    let message = if dry_run {
        check_control(platform, target)?;
        format!(
            "[DRY RUN] Would write {} to {} {} {}",
            value, target.name, target.domain, target.index
        )
    } else {
        platform.write_control(&target.name, target.domain, target.index, value)?;
        format!(
            "Wrote {} to {} {} {}",
            value, target.name, target.domain, target.index
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

fn read_value(platform: &PlatformIo, target: &TargetArgs) -> std::result::Result<SignalValue, PlatformError> {
    let value = platform.read_signal(&target.name, target.domain, target.index)?;
    Ok(SignalValue {
        name: target.name.clone(),
        domain: target.domain.to_string(),
        index: target.index,
        value,
        formatted: platform.format(&target.name)?.format(value),
    })
}

/// Validate a control address without writing
pub(crate) fn check_control(platform: &PlatformIo, target: &TargetArgs) -> std::result::Result<(), PlatformError> {
    let native = platform.control_domain_type(&target.name)?;
    if native != target.domain && !platform.topo().is_nested_domain(native, target.domain) {
        return Err(PlatformError::WrongDomain {
            name: target.name.clone(),
            expected: native,
            actual: target.domain,
        });
    }
    platform.topo().check_index(target.domain, target.index)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{cpu_topo, single_group};
    use crate::topo::Domain;

    fn platform() -> PlatformIo {
        let group = single_group("FAKE", Domain::Core, 2, &[("POWER", 10.0)], &["LIMIT"]);
        PlatformIo::new(cpu_topo(1, 2, 1), vec![group])
    }

    fn target(name: &str, domain: Domain, index: usize) -> TargetArgs {
        TargetArgs {
            name: name.to_string(),
            domain,
            index,
        }
    }

    #[test]
    fn test_read_aggregates_to_board() {
        let value = read_value(&platform(), &target("POWER", Domain::Board, 0)).unwrap();
        assert_eq!(value.value, 21.0);
        assert_eq!(value.formatted, "21");
    }

    #[test]
    fn test_check_control() {
        let platform = platform();
        assert!(check_control(&platform, &target("LIMIT", Domain::Core, 1)).is_ok());
        assert!(check_control(&platform, &target("LIMIT", Domain::Board, 0)).is_ok());
        assert!(matches!(
            check_control(&platform, &target("LIMIT", Domain::Gpu, 0)),
            Err(PlatformError::WrongDomain { .. })
        ));
        assert!(check_control(&platform, &target("LIMIT", Domain::Core, 2)).is_err());
        assert!(matches!(
            check_control(&platform, &target("POWER", Domain::Core, 0)),
            Err(PlatformError::UnknownControl(_))
        ));
    }

    #[test]
    fn test_write_control() {
        let mut platform = platform();
        run_write(
            &mut platform,
            &target("LIMIT", Domain::Core, 1),
            5.0,
            OutputFormat::Compact,
            false,
        )
        .unwrap();
        let snapshot = platform.save_control().unwrap();
        let written: Vec<f64> = snapshot.settings().iter().map(|s| s.setting).collect();
        assert_eq!(written, vec![0.0, 5.0]);
    }
}
