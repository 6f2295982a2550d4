mod ai;
mod category;
mod cli;
mod config;
mod daemon;
mod db;
mod error;
mod extract;
mod filter;
mod html_util;
mod http;
mod models;
mod orchestrator;
mod output;
mod persistence;
mod scheduler;
mod server;
mod sources;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Commands, MigrationsCommands};
use crate::config::{load_config, validate_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.core.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config_path = %cli.config.display(), "config loaded");

    validate_config(&config).context("config validation failed")?;
    info!("config validated successfully");

    match cli.command {
        Some(Commands::Validate) => {
            println!("Configuration is valid.");
        }
        Some(Commands::Run { processing_only }) => {
            let (_queue, orchestrator) = daemon::bootstrap(&config).await?;
            let cancel = tokio_util::sync::CancellationToken::new();

            let report = if processing_only {
                orchestrator.run_processing_only(&cancel).await?
            } else {
                orchestrator.run_cycle(&cancel).await?
            };

            println!(
                "sources={} ingested={} analyzed={} errors={}",
                report.sources_processed, report.articles_ingested, report.articles_ai_analyzed, report.errors_total
            );
        }
        Some(Commands::Migrations { command }) => {
            let pool = db::create_pool(&config).await.context("creating database")?;
            match command {
                MigrationsCommands::Status => {
                    let status = db::migration_status(&pool).await;
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
                MigrationsCommands::Run => {
                    let status = db::run_migrations(&pool).await;
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
            }
        }
        None => {
            daemon::run(config).await?;
        }
    }

    Ok(())
}
