//! Command-line interface for setupbench.
//!
//! Provides commands for running tasks and datasets, cleaning up
//! containers, and building derived agent images.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
