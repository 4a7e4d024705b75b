// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Store Factory - Application Layer
//!
//! Creates the concrete [`OutcomeStore`] for the configured storage backend,
//! keeping the domain layer free of infrastructure types.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Backend selection for the outcome store

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::domain::config::StorageConfig;
use crate::domain::repository::OutcomeStore;
use crate::infrastructure::db::Database;
use crate::infrastructure::memory_store::InMemoryOutcomeStore;
use crate::infrastructure::postgres_store::PostgresOutcomeStore;

/// Creates an OutcomeStore implementation based on the configured backend.
/// PostgreSQL stores have pending migrations applied before they are returned.
pub async fn create_outcome_store(config: &StorageConfig) -> Result<Arc<dyn OutcomeStore>> {
    match config {
        StorageConfig::InMemory => {
            info!("Using in-memory outcome store");
            Ok(Arc::new(InMemoryOutcomeStore::new()))
        }
        StorageConfig::Postgres { url, max_connections } => {
            let database = Database::new(url, *max_connections)
                .await
                .context("Failed to open outcome store database")?;
            database.run_migrations().await?;
            info!(max_connections, "Using PostgreSQL outcome store");
            Ok(Arc::new(PostgresOutcomeStore::new(database.get_pool().clone())))
        }
    }
}
