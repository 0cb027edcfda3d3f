//! Command-line interface for demo-forge.
//!
//! Provides commands to serve the HTTP API, run one job in the foreground,
//! replay a stage from a snapshot and list the configured stages.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
