//! Subcommand implementations for the histeq CLI.

mod equalize;
mod list;

pub use equalize::{cmd_equalize, device_selection};
pub use list::{cmd_list, format_platforms};
