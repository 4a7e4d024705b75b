// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `safla serve`: keep the consolidation scheduler running until a shutdown
//! signal arrives.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};

use crate::embedded::EmbeddedEngine;

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let embedded = EmbeddedEngine::new(config_path).await?;
    let engine = embedded.engine;

    let shutdown = engine.scheduler().shutdown_token();
    let handle = engine.start_background();
    info!("SAFLA engine serving; press Ctrl+C to stop");

    shutdown_signal().await?;
    shutdown.cancel();
    if let Err(e) = handle.await {
        warn!("Consolidation scheduler task ended abnormally: {}", e);
    }
    info!("SAFLA engine stopped");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C signal");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM signal");
        },
    }
    Ok(())
}
