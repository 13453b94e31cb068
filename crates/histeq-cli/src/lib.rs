//! Shared pieces of the histeq command-line tool.

pub mod args;
pub mod commands;
pub mod report;

pub use args::{Cli, DEFAULT_INPUT};
pub use commands::{cmd_equalize, cmd_list, device_selection};
pub use report::{format_equalization, format_profile_totals, format_stage_timing, format_table};
