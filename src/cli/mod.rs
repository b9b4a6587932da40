//! CLI argument parsing and output formatting
//!
//! Arguments are declared with clap derive; every command prints through
//! [`output::print_output`] in the format chosen by `--format`.

pub mod args;
pub mod output;

pub use args::{Cli, Commands, OutputFormat, TargetArgs};
