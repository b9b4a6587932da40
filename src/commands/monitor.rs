//! Monitor command implementation
//!
//! Samples the requested signals until the count is reached or the process
//! is interrupted.

use crate::cli::args::{MonitorArgs, OutputFormat};
use crate::cli::output::{print_output, SampleRow};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::iogroup::PlatformIo;
use crate::services::{Monitor, MonitorConfig, SignalRequest};

use std::time::Duration;

/// Group positional `NAME DOMAIN IDX` triples into requests
pub fn parse_requests(values: &[String]) -> Result<Vec<SignalRequest>> {
    if values.len() % 3 != 0 {
        return Err(AppError::InvalidInput(format!(
            "expected NAME DOMAIN IDX triples, got {} value(s)",
            values.len()
        )));
    }
    values
        .chunks(3)
        .map(|triple| {
            let domain = triple[1]
                .parse()
                .map_err(|_| AppError::InvalidInput(format!("unknown domain: {}", triple[1])))?;
            let index = triple[2]
                .parse()
                .map_err(|_| AppError::InvalidInput(format!("bad domain index: {}", triple[2])))?;
            Ok(SignalRequest::new(triple[0].clone(), domain, index))
        })
        .collect()
}

fn interval(seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| AppError::InvalidInput(format!("invalid interval: {}", seconds)))
}

/// Execute the monitor command
pub fn run_monitor(
    platform: &mut PlatformIo,
    args: &MonitorArgs,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let requests = parse_requests(&args.signals)?;
    let monitor_config = MonitorConfig {
        interval: interval(args.interval.unwrap_or(config.general.interval_seconds))?,
        count: args.count,
        retry: args.retry,
    };
    let mut monitor = Monitor::new(monitor_config, requests);
    monitor.init(platform)?;

    let headers = monitor.headers();
    match format {
        OutputFormat::Table => println!("{}", headers.join("\t")),
        OutputFormat::Compact => println!("{}", headers.join(",")),
        OutputFormat::Json => {}
    }

    monitor.run(platform, |values| {
        let row = SampleRow {
            headers: headers.clone(),
            values: values.to_vec(),
        };
        print_output(&row, format)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topo::Domain;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_requests() {
        let requests =
            parse_requests(&strings(&["GPU_POWER", "gpu", "1", "CPU_FREQUENCY_STATUS", "core", "0"]))
                .unwrap();
        assert_eq!(
            requests,
            vec![
                SignalRequest::new("GPU_POWER", Domain::Gpu, 1),
                SignalRequest::new("CPU_FREQUENCY_STATUS", Domain::Core, 0),
            ]
        );
    }

    #[test]
    fn test_parse_requests_errors() {
        assert!(parse_requests(&strings(&["GPU_POWER", "gpu"])).is_err());
        assert!(parse_requests(&strings(&["GPU_POWER", "socket", "0"])).is_err());
        assert!(parse_requests(&strings(&["GPU_POWER", "gpu", "-1"])).is_err());
    }

    #[test]
    fn test_interval() {
        assert_eq!(interval(0.5).unwrap(), Duration::from_millis(500));
        assert!(interval(-1.0).is_err());
        assert!(interval(f64::NAN).is_err());
    }
}
