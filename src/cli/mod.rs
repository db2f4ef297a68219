//! Command-line interface for pkg-mender.
//!
//! Provides the repair run plus standalone patch and build-check commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
