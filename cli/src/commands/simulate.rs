// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `safla simulate`: run the engine against the synthetic executor and
//! report how the strategies for one key evolved.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use safla_engine::application::engine::Collaborators;
use safla_engine::domain::config::EngineConfigManifest;
use safla_engine::domain::event::LearningDomain;

use crate::embedded::EmbeddedEngine;
use crate::simulation::{run_simulation, Environment, SyntheticExecutor};

#[derive(Args)]
pub struct SimulateArgs {
    /// Learning domain (navigation, parsing, proposal)
    #[arg(long, default_value = "portal-navigation")]
    pub domain: LearningDomain,

    /// Portal, document type or issuer the strategies are learned for
    #[arg(long, default_value = "simulated")]
    pub key: String,

    /// Number of tasks to run
    #[arg(long, default_value_t = 200)]
    pub tasks: usize,

    /// Seed for both the engine and the synthetic executor
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Tasks per point on the success curve
    #[arg(long, default_value_t = 20)]
    pub window: usize,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: SimulateArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut manifest = EngineConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    manifest.spec.learning.seed = Some(args.seed);
    let embedded = EmbeddedEngine::from_manifest(manifest, Collaborators::default()).await?;
    let engine = &embedded.engine;

    let executor = SyntheticExecutor::new(Environment::default(), args.seed);
    let summary = run_simulation(engine, &executor, args.domain, &args.key, args.tasks, args.window).await;

    let strategies = engine
        .store()
        .find_strategies(args.domain, &args.key)
        .await
        .context("Failed to read strategies")?;
    let recommendations = engine
        .get_improvement_recommendations("simulator")
        .await
        .context("Failed to build recommendations")?;

    if args.json {
        let report = serde_json::json!({
            "summary": summary,
            "strategies": strategies,
            "recommendations": recommendations,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{}",
        format!("Simulated {} tasks for {}/{}", summary.tasks, args.domain, args.key).bold()
    );
    println!(
        "  Successes: {} ({:.1}%)",
        summary.successes,
        100.0 * summary.successes as f64 / summary.tasks.max(1) as f64
    );
    if summary.errors > 0 {
        println!("  {}", format!("Unrecorded tasks: {}", summary.errors).yellow());
    }
    let curve: Vec<String> = summary.curve.iter().map(|r| format!("{:.2}", r)).collect();
    println!("  Success curve (per {} tasks): {}", args.window, curve.join(" "));
    println!();

    println!("{}", "Strategies:".bold());
    for strategy in &strategies {
        let status = if strategy.archived { " (archived)".dimmed().to_string() } else { String::new() };
        println!("  {}{}", strategy.id.to_string().bold(), status);
        println!(
            "    version {} | samples {} | success {:.2} | q {:.3} | confidence {:.2}",
            strategy.version,
            strategy.performance.sample_size,
            strategy.performance.success_rate,
            strategy.q_value,
            strategy.confidence_score
        );
        println!(
            "    explored {} | exploited {}",
            strategy.exploration_count, strategy.exploitation_count
        );
        for record in &strategy.adaptation_history {
            let impact = record
                .impact_score
                .map(|i| format!("{:+.2}", i))
                .unwrap_or_else(|| "pending".to_string());
            println!(
                "    - {} ({} changes, impact {})",
                record.trigger,
                record.changes.len(),
                impact
            );
        }
    }
    println!();

    if !recommendations.is_empty() {
        println!("{}", "Recommendations:".bold());
        for rec in &recommendations {
            println!("  [{:.2}] {}", rec.priority, rec.message);
        }
    }

    Ok(())
}
