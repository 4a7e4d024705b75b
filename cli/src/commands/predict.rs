// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Predictive scoring commands
//!
//! Commands: deadline, price, win

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use safla_engine::application::predictive::{assess_deadline_risk, optimize_price};
use safla_engine::domain::prediction::{
    DeadlineRequest, Prediction, PriceRequest, RiskLevel, TaskEstimate, WinProbabilityRequest,
};

use crate::embedded::EmbeddedEngine;

#[derive(Subcommand)]
pub enum PredictCommand {
    /// Risk of missing a submission deadline
    Deadline {
        /// Total estimated effort in days (ignored with --tasks)
        #[arg(long, default_value_t = 0.0)]
        estimated_days: f64,

        /// Days left until the deadline
        #[arg(long)]
        deadline_days: f64,

        /// Normalized complexity in [0, 1]
        #[arg(long, default_value_t = 0.5)]
        complexity: f64,

        /// YAML list of task estimates with dependencies
        #[arg(long, value_name = "FILE")]
        tasks: Option<PathBuf>,
    },

    /// Recommended bid price
    Price {
        #[arg(long)]
        cost: f64,

        #[arg(long, default_value_t = 0.15)]
        desired_margin: f64,

        #[arg(long, default_value_t = 0.05)]
        min_margin: f64,

        /// Known competitor price (repeatable)
        #[arg(long = "competitor", value_name = "PRICE")]
        competitors: Vec<f64>,
    },

    /// Probability of winning a bid, using recorded proposal outcomes
    Win {
        #[arg(long)]
        bid: Option<f64>,

        #[arg(long)]
        market: Option<f64>,

        #[arg(long, default_value_t = 0.5)]
        complexity: f64,

        #[arg(long)]
        historical_win_rate: Option<f64>,

        /// Issuer or agency the bid goes to
        #[arg(long)]
        key: Option<String>,
    },
}

pub async fn handle_command(command: PredictCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        PredictCommand::Deadline {
            estimated_days,
            deadline_days,
            complexity,
            tasks,
        } => deadline(estimated_days, deadline_days, complexity, tasks),
        PredictCommand::Price {
            cost,
            desired_margin,
            min_margin,
            competitors,
        } => price(PriceRequest {
            cost,
            desired_margin,
            min_margin,
            competitor_prices: competitors,
        }),
        PredictCommand::Win {
            bid,
            market,
            complexity,
            historical_win_rate,
            key,
        } => {
            let request = WinProbabilityRequest {
                key,
                bid_value: bid,
                market_value: market,
                complexity,
                historical_win_rate,
            };
            win(request, config_path).await
        }
    }
}

fn deadline(estimated_days: f64, deadline_days: f64, complexity: f64, tasks: Option<PathBuf>) -> Result<()> {
    let request = match tasks {
        Some(path) => {
            let content =
                std::fs::read_to_string(&path).with_context(|| format!("Failed to read tasks from {:?}", path))?;
            let tasks: Vec<TaskEstimate> = serde_yaml::from_str(&content).context("Failed to parse task estimates")?;
            DeadlineRequest {
                tasks,
                days_until_deadline: deadline_days,
            }
        }
        None => DeadlineRequest::aggregate(estimated_days, deadline_days, complexity),
    };

    let risk = assess_deadline_risk(&request)?;
    let level = match risk.risk_level {
        RiskLevel::Low => risk.risk_level.to_string().green(),
        RiskLevel::Medium => risk.risk_level.to_string().yellow(),
        RiskLevel::High | RiskLevel::Critical => risk.risk_level.to_string().red(),
    };
    println!("{} {}", "Deadline risk:".bold(), level);
    println!("  Required days: {:.1}", risk.required_days);
    println!("  Time ratio: {:.2}", risk.time_ratio);
    print_prediction("Delay probability", &risk.prediction);
    Ok(())
}

fn price(request: PriceRequest) -> Result<()> {
    let recommendation = optimize_price(&request)?;
    println!(
        "{} {:.2}",
        "Recommended price:".bold(),
        recommendation.prediction.value
    );
    println!(
        "  Range: {:.2} - {:.2}",
        recommendation.min_price, recommendation.max_price
    );
    if let Some(median) = recommendation.competitor_median {
        println!("  Competitor median: {:.2}", median);
    }
    print_prediction("Price", &recommendation.prediction);
    Ok(())
}

async fn win(request: WinProbabilityRequest, config_path: Option<PathBuf>) -> Result<()> {
    let embedded = EmbeddedEngine::new(config_path).await?;
    let prediction = embedded
        .engine
        .predictive()
        .win_probability(&request)
        .await
        .context("Failed to estimate win probability")?;
    print_prediction("Win probability", &prediction);
    Ok(())
}

fn print_prediction(label: &str, prediction: &Prediction) {
    println!("  {}: {:.2} (confidence {:.2})", label, prediction.value, prediction.confidence);
    for factor in &prediction.contributing_factors {
        println!("    {} {:+.3}", factor.name.dimmed(), factor.impact);
    }
}
