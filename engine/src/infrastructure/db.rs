// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype that is handed
//! to [`PostgresOutcomeStore`](crate::infrastructure::postgres_store::PostgresOutcomeStore).
//! Only needed when `spec.storage.backend` is `postgres`.

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    /// Apply pending schema migrations
    pub async fn run_migrations(&self) -> Result<()> {
        let total = MIGRATOR.iter().count();
        tracing::info!(total, "Applying outcome store migrations");
        MIGRATOR.run(&self.pool).await.context("Failed to apply migrations")?;
        Ok(())
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}
