use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "newsroom", about = "News aggregation and digest daemon")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration file
    Validate,

    /// Run a single orchestrator cycle on demand and exit
    Run {
        /// Skip digest generation and emission; ingest and analyze only
        #[arg(long)]
        processing_only: bool,
    },

    /// Inspect or apply pending schema migrations
    Migrations {
        #[command(subcommand)]
        command: MigrationsCommands,
    },
}

#[derive(Subcommand)]
pub enum MigrationsCommands {
    /// Print applied/pending migration versions without writing anything
    Status,
    /// Apply all pending migrations
    Run,
}
