// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use safla_engine::domain::config::{EngineConfigManifest, StorageConfig};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./safla-config.yaml)
        #[arg(short, long, default_value = "./safla-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = EngineConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. SAFLA_CONFIG_PATH: {}",
            std::env::var("SAFLA_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./safla-config.yaml");
        println!("  4. ~/.safla/config.yaml");
        println!("  5. /etc/safla/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let spec = &config.spec;
    println!("{}", "Learning:".bold());
    println!("  Learning rate (α): {}", spec.learning.learning_rate);
    println!("  Discount factor (γ): {}", spec.learning.discount_factor);
    println!("  Exploration rate (ε): {}", spec.learning.epsilon);
    println!(
        "  Rewards: success {} / failure {}",
        spec.learning.success_reward, spec.learning.failure_reward
    );
    for (metric, bonus) in &spec.learning.metric_bonuses {
        println!("    Bonus {} → {}", metric, bonus);
    }
    println!();

    println!("{}", "Analysis:".bold());
    println!("  Window: {} events", spec.analysis.window_size);
    println!("  Minimum samples: {}", spec.analysis.min_samples);
    println!("  Top insights: {}", spec.analysis.top_k);
    println!();

    println!("{}", "Consolidation:".bold());
    println!("  Enabled: {}", spec.consolidation.enabled);
    println!("  Interval: {}s", spec.consolidation.interval_secs);
    println!("  Retention: {} days", spec.consolidation.retention_days);
    println!(
        "  Random trigger probability: {}",
        spec.consolidation.random_trigger_probability
    );
    println!();

    println!("{}", "Storage:".bold());
    match &spec.storage {
        StorageConfig::InMemory => println!("  Backend: in-memory"),
        StorageConfig::Postgres { max_connections, .. } => {
            println!("  Backend: postgres ({} connections)", max_connections)
        }
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = EngineConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    std::fs::write(&output, template(with_examples))
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

fn template(with_examples: bool) -> &'static str {
    if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    }
}
