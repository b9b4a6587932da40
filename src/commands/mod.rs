//! Command handlers
//!
//! Each command handler orchestrates the execution of a CLI command.

pub mod access;
pub mod batch;
pub mod domains;
pub mod monitor;
pub mod names;
pub mod platform;
pub mod snapshot;

pub use access::{run_read, run_write};
pub use batch::run_batch;
pub use domains::run_domains;
pub use monitor::run_monitor;
pub use names::{run_controls, run_signals};
pub use platform::open_platform;
pub use snapshot::{run_restore, run_save};
