// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `safla consolidate`: one consolidation cycle against the configured store

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use crate::embedded::EmbeddedEngine;

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let embedded = EmbeddedEngine::new(config_path).await?;

    match embedded
        .engine
        .consolidate()
        .await
        .context("Consolidation failed")?
    {
        Some(report) => {
            println!("{}", "✓ Consolidation completed".green());
            println!("  Knowledge records: {}", report.knowledge_created);
            println!("  Events pruned: {}", report.events_pruned);
            println!("  Graph tasks forgotten: {}", report.tasks_forgotten);
            println!("  Strategies archived: {}", report.strategies_archived);
            if report.failed_keys > 0 {
                println!("  {}", format!("Keys skipped after errors: {}", report.failed_keys).yellow());
            }
            println!("  Duration: {}ms", report.duration_ms);
        }
        None => println!("{}", "Another consolidation cycle is already running".yellow()),
    }

    Ok(())
}
