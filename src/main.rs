//! platio - batched CPU and GPU signal/control tool
//!
//! A command-line front end for reading hardware signals and writing
//! controls through the NVML, Intel GPU, Intel SST and cpufreq backends.

use clap::Parser;
use platio::cli::args::{generate_completions, Cli, Commands};
use platio::commands::{
    open_platform, run_batch, run_controls, run_domains, run_monitor, run_read, run_restore,
    run_save, run_signals, run_write,
};
use platio::config::{Config, ConfigBuilder};
use platio::error::{AppError, HardwareError, PlatformError};

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    let config = ConfigBuilder::new()
        .with_file(cli.config.as_deref())
        .with_verbose(cli.verbose.then_some(true))
        .with_dry_run(cli.dry_run.then_some(true))
        .with_cpu_root(cli.cpu_root.clone())
        .with_backends((!cli.backends.is_empty()).then_some(cli.backends.as_slice()))
        .build();

    // Set log level based on verbose flag
    if config.general.verbose {
        log::set_max_level(log::LevelFilter::Debug);
    }

    // Run the appropriate command
    let result = run(&cli, &config);

    if let Err(e) = result {
        log::error!("{}", e);
        print_error(&e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli, config: &Config) -> Result<(), AppError> {
    let dry_run = config.general.dry_run;

    if let Commands::Completions { shell } = &cli.command {
        generate_completions(*shell);
        return Ok(());
    }

    let mut platform = open_platform(config)?;

    match &cli.command {
        Commands::Signals { info } => run_signals(&platform, info.as_deref(), cli.format),

        Commands::Controls { info } => run_controls(&platform, info.as_deref(), cli.format),

        Commands::Read(target) => run_read(&platform, target, cli.format),

        Commands::Write { target, value } => {
            run_write(&mut platform, target, *value, cli.format, dry_run)
        }

        Commands::Batch { file } => run_batch(&mut platform, file, cli.format, dry_run),

        Commands::Domains => run_domains(platform.topo(), cli.format),

        Commands::Save { path } => {
            let path = path.clone().unwrap_or_else(|| config.save.path.clone());
            run_save(&platform, &path, cli.format)
        }

        Commands::Restore { path } => {
            let path = path.clone().unwrap_or_else(|| config.save.path.clone());
            run_restore(&mut platform, &path, cli.format, dry_run)
        }

        Commands::Monitor(args) => run_monitor(&mut platform, args, config, cli.format),

        Commands::Completions { .. } => Ok(()),
    }
}

fn print_error(err: &AppError) {
    eprintln!("Error: {}", err);

    // Print helpful hints for common errors
    match err {
        AppError::Platform(PlatformError::Hardware(HardwareError::LibraryNotFound)) => {
            eprintln!();
            eprintln!("Hint: Make sure the NVIDIA driver is installed.");
            eprintln!("      On Linux, install the nvidia-utils package.");
        }
        AppError::Platform(PlatformError::Hardware(HardwareError::InsufficientPermissions(_))) => {
            eprintln!();
            eprintln!("Hint: Try running with sudo or as root.");
        }
        AppError::Platform(PlatformError::UnknownSignal(_) | PlatformError::UnknownControl(_)) => {
            eprintln!();
            eprintln!("Hint: Run 'platio signals' or 'platio controls' to list available names.");
        }
        AppError::NoBackends => {
            eprintln!();
            eprintln!("Hint: None of nvml, levelzero, sst or cpufreq could be loaded.");
            eprintln!("      Run with --verbose to see why each backend was skipped.");
        }
        _ => {}
    }
}
