//! Command-line interface for flowforge.
//!
//! Provides the `deploy`, `from-script` and `check` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
