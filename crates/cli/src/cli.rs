use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Inspect and exercise flowgate write-path flow control.
#[derive(Parser, Debug)]
#[command(name = "flowgate", about = "Write-path flow control for artifact pipelines")]
pub struct CliArgs {
    /// Path to a TOML config file (defaults plus FLOWGATE_* env overrides when unset)
    #[arg(long, global = true, env = "FLOWGATE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the resolved write dispatch config as JSON
    Resolve {
        /// Reject invalid pattern overrides instead of skipping them
        #[arg(long)]
        strict: bool,
    },

    /// Classify one artifact write and print its lane and tokens
    Classify {
        /// Artifact file name or path
        label: String,

        /// Estimated payload size in bytes
        #[arg(long)]
        bytes: Option<u64>,
    },

    /// Run producers against the configured queue and print its stats
    Simulate {
        /// Concurrent producer tasks
        #[arg(long, default_value = "4")]
        producers: usize,

        /// Total writes across all producers
        #[arg(long, default_value = "200")]
        writes: usize,

        /// How long each write holds its reservation, in milliseconds
        #[arg(long, default_value = "2")]
        hold_ms: u64,
    },
}
