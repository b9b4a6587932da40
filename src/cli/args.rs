//! CLI argument definitions using clap derive
//!
//! Defines all command-line arguments and subcommands.

use crate::topo::Domain;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Batched access to CPU and GPU power/performance signals and controls
///
/// Reads signals and writes controls exposed by the NVML, Intel GPU, Intel
/// SST and cpufreq backends, addressed by name, domain and domain index.
#[derive(Parser, Debug)]
#[command(name = "platio")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "PLATIO_CONFIG")]
    pub config: Option<String>,

    /// Load only these backends (nvml, levelzero, sst, cpufreq)
    #[arg(long = "backend", global = true, value_name = "NAME")]
    pub backends: Vec<String>,

    /// Root of the sysfs CPU tree
    #[arg(long, global = true, value_name = "DIR")]
    pub cpu_root: Option<PathBuf>,

    /// Dry run mode - don't actually apply changes
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List signal names, or describe one
    Signals {
        /// Describe this signal instead of listing
        #[arg(short, long, value_name = "NAME")]
        info: Option<String>,
    },

    /// List control names, or describe one
    Controls {
        /// Describe this control instead of listing
        #[arg(short, long, value_name = "NAME")]
        info: Option<String>,
    },

    /// Read one signal immediately
    Read(TargetArgs),

    /// Write one control immediately
    Write {
        #[command(flatten)]
        target: TargetArgs,

        /// Setting in SI units
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },

    /// Apply control settings from a file as one batch
    ///
    /// Each line holds `NAME DOMAIN IDX VALUE`; blank lines and lines
    /// starting with `#` are skipped.
    Batch {
        /// Input file, `-` for stdin
        #[arg(default_value = "-")]
        file: String,
    },

    /// Show the number of instances of each domain
    Domains,

    /// Save every restorable control to a JSON file
    Save {
        /// Output path (defaults to the configured save path)
        path: Option<PathBuf>,
    },

    /// Restore controls from a file written by `save`
    Restore {
        /// Input path (defaults to the configured save path)
        path: Option<PathBuf>,
    },

    /// Sample signals periodically
    Monitor(MonitorArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Signal or control address
#[derive(Parser, Debug, Clone)]
pub struct TargetArgs {
    /// Signal or control name
    pub name: String,

    /// Domain type (board, package, core, cpu, memory, gpu, gpu_chip)
    pub domain: Domain,

    /// Domain index
    pub index: usize,
}

/// Arguments for the monitor command
#[derive(Parser, Debug)]
pub struct MonitorArgs {
    /// Triples of `NAME DOMAIN IDX`
    #[arg(required = true, num_args = 3.., value_name = "NAME DOMAIN IDX")]
    pub signals: Vec<String>,

    /// Sampling interval in seconds
    #[arg(short, long)]
    pub interval: Option<f64>,

    /// Number of samples to take (default: run until interrupted)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Keep sampling after a failed read
    #[arg(long)]
    pub retry: bool,
}

/// Output format
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format for machine parsing
    Json,
    /// Compact single-line format
    Compact,
}

/// Generate shell completions and print to stdout
pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
}
