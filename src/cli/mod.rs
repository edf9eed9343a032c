//! Command-line interface for commitlens.
//!
//! Provides commands for running the service (`serve`, `work`), operating its
//! queues (`enqueue`, `status`, `stats`) and analyzing a local diff.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
