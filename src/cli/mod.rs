//! Command-line interface for scrape-queue.
//!
//! Provides commands for enqueueing scrape jobs, running worker pools, and
//! inspecting or maintaining the persisted queue.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
