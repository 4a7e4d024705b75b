// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # SAFLA CLI
//!
//! The `safla` binary drives the strategy-learning engine from the shell.
//!
//! ## Commands
//!
//! - `safla config show|validate|generate` - Configuration management
//! - `safla simulate` - Run the engine against a synthetic executor
//! - `safla consolidate` - Run one consolidation cycle
//! - `safla predict deadline|price|win` - Predictive scoring
//! - `safla serve` - Run the consolidation scheduler until interrupted

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use safla_cli::commands::{self, ConfigCommand, PredictCommand, SimulateArgs};

/// SAFLA - adaptive strategy learning for procurement agents
#[derive(Parser)]
#[command(name = "safla")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "SAFLA_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SAFLA_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Drive the engine with a deterministic synthetic executor
    #[command(name = "simulate")]
    Simulate(SimulateArgs),

    /// Run one consolidation cycle against the configured store
    #[command(name = "consolidate")]
    Consolidate,

    /// Predictive scoring
    #[command(name = "predict")]
    Predict {
        #[command(subcommand)]
        command: PredictCommand,
    },

    /// Run the consolidation scheduler until Ctrl+C
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Best effort; a missing .env is not an error
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Simulate(args)) => commands::simulate::execute(args, cli.config).await,
        Some(Commands::Consolidate) => commands::consolidate::execute(cli.config).await,
        Some(Commands::Predict { command }) => commands::predict::handle_command(command, cli.config).await,
        Some(Commands::Serve) => commands::serve::execute(cli.config).await,
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
