//! Command-line tool for inspecting affinity assignments.
//!
//! Provides commands for:
//! - Printing the partition table of a topology
//! - Simulating joins and leaves and counting moved partitions
//! - Routing keys to partitions and owners
//! - Showing how the hash ring is shared between nodes

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
