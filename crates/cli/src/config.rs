//! Command-line arguments and affinity configuration loading.

use crate::commands::Command;
use affinity::AffinityConfig;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, Level};

#[derive(Debug, Parser)]
#[command(name = "affinity-cli", version, about = "Inspect partition affinity for a set of nodes")]
pub struct CliConfig {
    /// Log level written to stderr (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: Level,

    /// JSON file holding an affinity configuration.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides the configured partition count.
    #[arg(long, global = true)]
    pub partitions: Option<u32>,

    /// Overrides the configured backup count.
    #[arg(long, global = true)]
    pub backups: Option<usize>,

    /// Overrides the configured virtual points per node.
    #[arg(long, global = true)]
    pub replicas: Option<usize>,

    /// Keep backups off the hosts of the other owners (`name@host` nodes).
    #[arg(long, global = true)]
    pub exclude_neighbors: bool,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    /// Configuration file (if any) with command-line overrides applied.
    pub fn affinity_config(&self) -> anyhow::Result<AffinityConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
            }
            None => AffinityConfig::default(),
        };

        if let Some(partitions) = self.partitions {
            config.partitions = partitions;
        }
        if let Some(backups) = self.backups {
            config.backups = backups;
        }
        if let Some(replicas) = self.replicas {
            config.replicas = replicas;
        }
        if self.exclude_neighbors {
            config.exclude_neighbors = true;
        }

        config.validate()?;
        Ok(config)
    }

    /// Installs the stderr log subscriber. Ignored if one is already set.
    pub fn init_tracing(&self) {
        let _ = tracing_subscriber::fmt()
            .with_max_level(self.log_level)
            .with_writer(std::io::stderr)
            .try_init();
    }

    pub fn run(&self) -> anyhow::Result<()> {
        self.init_tracing();
        let config = self.affinity_config()?;
        debug!(?config, command = ?self.command, "running command");

        let result = self.command.execute(&config)?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print!("{result}");
        }
        Ok(())
    }
}
