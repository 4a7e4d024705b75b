// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Outcome Store
//!
//! Production [`OutcomeStore`] backed by PostgreSQL via `sqlx`. Every aggregate
//! is stored as a JSONB payload next to the scalar columns used for filtering.
//! Strategy writes through [`OutcomeStore::put_strategy_if_version`] are
//! conditional on the stored `version` column, giving compare-and-swap
//! semantics across engine instances.
//!
//! Schema: `engine/migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::ab_test::{AbTest, AbTestId};
use crate::domain::error::StoreError;
use crate::domain::event::{EventId, LearningDomain, LearningEvent};
use crate::domain::graph::{KnowledgeEdge, KnowledgeNode, NodeKind};
use crate::domain::knowledge::ConsolidatedKnowledge;
use crate::domain::learning_state::{QUpdate, StateKey};
use crate::domain::repository::{EventQuery, OutcomeStore, StaleEventCount};
use crate::domain::strategy::{Strategy, StrategyId};

pub struct PostgresOutcomeStore {
    pool: PgPool,
}

impl PostgresOutcomeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_strategies(
        &self,
        sql: &'static str,
        domain: Option<&str>,
        key: Option<&str>,
    ) -> Result<Vec<Strategy>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(domain)
            .bind(key)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| decode_payload(row)).collect()
    }
}

fn decode_payload<T: DeserializeOwned>(row: &sqlx::postgres::PgRow) -> Result<T, StoreError> {
    let payload: serde_json::Value = row.try_get("payload")?;
    Ok(serde_json::from_value(payload)?)
}

fn parse_domain(raw: &str) -> Result<LearningDomain, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Serialization(format!("unknown domain '{}' in outcome store", raw)))
}

fn decode_q_row(rows: &[sqlx::postgres::PgRow]) -> Result<HashMap<StrategyId, f64>, StoreError> {
    rows.iter()
        .map(|row| {
            let id: Uuid = row.try_get("strategy_id")?;
            let value: f64 = row.try_get("q_value")?;
            Ok((StrategyId(id), value))
        })
        .collect()
}

fn node_type(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Task { .. } => "task",
        NodeKind::ActorDomain { .. } => "actor_domain",
        NodeKind::Requirement { .. } => "requirement",
        NodeKind::Strategy { .. } => "strategy",
    }
}

#[async_trait]
impl OutcomeStore for PostgresOutcomeStore {
    async fn append(&self, event: &LearningEvent) -> Result<EventId, StoreError> {
        let payload = serde_json::to_value(event)?;

        sqlx::query(
            r#"
            INSERT INTO learning_events (id, domain, key, actor_id, timestamp, success, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id.0)
        .bind(event.domain.as_str())
        .bind(&event.key)
        .bind(&event.actor_id)
        .bind(event.timestamp)
        .bind(event.outcome.success)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to append learning event: {}", e)))?;

        Ok(event.id)
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<LearningEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM learning_events
            WHERE ($1::text IS NULL OR domain = $1)
              AND ($2::text IS NULL OR key = $2)
              AND ($3::text IS NULL OR actor_id = $3)
              AND ($4::timestamptz IS NULL OR timestamp >= $4)
              AND ($5::timestamptz IS NULL OR timestamp < $5)
            ORDER BY timestamp DESC
            LIMIT $6
            "#,
        )
        .bind(query.domain.map(|d| d.as_str()))
        .bind(query.key.as_deref())
        .bind(query.actor_id.as_deref())
        .bind(query.since)
        .bind(query.before)
        .bind(query.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| decode_payload(row)).collect()
    }

    async fn stale_event_counts(&self, before: DateTime<Utc>) -> Result<Vec<StaleEventCount>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT domain, key, COUNT(*) AS stale
            FROM learning_events
            WHERE timestamp < $1
            GROUP BY domain, key
            ORDER BY domain, key
            "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let domain: String = row.try_get("domain")?;
                let stale: i64 = row.try_get("stale")?;
                Ok(StaleEventCount {
                    domain: parse_domain(&domain)?,
                    key: row.try_get("key")?,
                    count: stale as usize,
                })
            })
            .collect()
    }

    async fn prune_events(
        &self,
        domain: LearningDomain,
        key: &str,
        before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM learning_events WHERE domain = $1 AND key = $2 AND timestamp < $3")
            .bind(domain.as_str())
            .bind(key)
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_strategy(&self, domain: LearningDomain, key: &str) -> Result<Option<Strategy>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT payload FROM strategies
            WHERE domain = $1 AND key = $2 AND NOT archived
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(domain.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_payload).transpose()
    }

    async fn find_strategy(&self, id: StrategyId) -> Result<Option<Strategy>, StoreError> {
        let row = sqlx::query("SELECT payload FROM strategies WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_payload).transpose()
    }

    async fn find_strategies(&self, domain: LearningDomain, key: &str) -> Result<Vec<Strategy>, StoreError> {
        self.fetch_strategies(
            "SELECT payload FROM strategies WHERE domain = $1 AND key = $2 ORDER BY created_at ASC, id ASC",
            Some(domain.as_str()),
            Some(key),
        )
        .await
    }

    async fn list_strategies(&self, domain: Option<LearningDomain>) -> Result<Vec<Strategy>, StoreError> {
        self.fetch_strategies(
            r#"
            SELECT payload FROM strategies
            WHERE ($1::text IS NULL OR domain = $1) AND ($2::text IS NULL OR key = $2)
            ORDER BY created_at ASC, id ASC
            "#,
            domain.map(|d| d.as_str()),
            None,
        )
        .await
    }

    async fn put_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
        let payload = serde_json::to_value(strategy)?;

        sqlx::query(
            r#"
            INSERT INTO strategies (id, domain, key, version, archived, created_at, updated_at, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                version = EXCLUDED.version,
                archived = EXCLUDED.archived,
                updated_at = EXCLUDED.updated_at,
                payload = EXCLUDED.payload
            "#,
        )
        .bind(strategy.id.0)
        .bind(strategy.domain.as_str())
        .bind(&strategy.key)
        .bind(strategy.version as i64)
        .bind(strategy.archived)
        .bind(strategy.created_at)
        .bind(strategy.updated_at)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to save strategy: {}", e)))?;

        Ok(())
    }

    async fn put_strategy_if_version(&self, strategy: &Strategy, expected: Option<u64>) -> Result<(), StoreError> {
        let payload = serde_json::to_value(strategy)?;

        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO strategies (id, domain, key, version, archived, created_at, updated_at, payload)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(strategy.id.0)
                .bind(strategy.domain.as_str())
                .bind(&strategy.key)
                .bind(strategy.version as i64)
                .bind(strategy.archived)
                .bind(strategy.created_at)
                .bind(strategy.updated_at)
                .bind(payload)
                .execute(&self.pool)
                .await?
            }
            Some(version) => {
                sqlx::query(
                    r#"
                    UPDATE strategies
                    SET version = $2, archived = $3, updated_at = $4, payload = $5
                    WHERE id = $1 AND version = $6
                    "#,
                )
                .bind(strategy.id.0)
                .bind(strategy.version as i64)
                .bind(strategy.archived)
                .bind(strategy.updated_at)
                .bind(payload)
                .bind(version as i64)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            let found: Option<i64> = sqlx::query_scalar("SELECT version FROM strategies WHERE id = $1")
                .bind(strategy.id.0)
                .fetch_optional(&self.pool)
                .await?;
            return Err(StoreError::VersionConflict {
                id: strategy.id.to_string(),
                expected,
                found: found.map(|v| v as u64),
            });
        }
        Ok(())
    }

    async fn put_knowledge(&self, knowledge: &ConsolidatedKnowledge) -> Result<(), StoreError> {
        let payload = serde_json::to_value(knowledge)?;
        sqlx::query(
            r#"
            INSERT INTO consolidated_knowledge (id, domain, key, created_at, payload)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload
            "#,
        )
        .bind(knowledge.id)
        .bind(knowledge.domain.as_str())
        .bind(&knowledge.key)
        .bind(knowledge.created_at)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_knowledge(&self, domain: Option<LearningDomain>) -> Result<Vec<ConsolidatedKnowledge>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM consolidated_knowledge
            WHERE ($1::text IS NULL OR domain = $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(domain.map(|d| d.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|row| decode_payload(row)).collect()
    }

    async fn put_node(&self, node: &KnowledgeNode) -> Result<(), StoreError> {
        let payload = serde_json::to_value(node)?;
        sqlx::query(
            r#"
            INSERT INTO graph_nodes (id, node_type, last_seen, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET last_seen = EXCLUDED.last_seen, payload = EXCLUDED.payload
            "#,
        )
        .bind(node.id.0)
        .bind(node_type(&node.kind))
        .bind(node.last_seen)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_edge(&self, edge: &KnowledgeEdge) -> Result<(), StoreError> {
        let payload = serde_json::to_value(edge)?;
        sqlx::query(
            r#"
            INSERT INTO graph_edges (id, from_node, to_node, edge_type, payload)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload
            "#,
        )
        .bind(edge.id.0)
        .bind(edge.from.0)
        .bind(edge.to.0)
        .bind(edge.kind.as_str())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<KnowledgeNode>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM graph_nodes").fetch_all(&self.pool).await?;
        rows.iter().map(|row| decode_payload(row)).collect()
    }

    async fn list_edges(&self) -> Result<Vec<KnowledgeEdge>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM graph_edges").fetch_all(&self.pool).await?;
        rows.iter().map(|row| decode_payload(row)).collect()
    }

    async fn prune_task_nodes(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM graph_edges
            WHERE from_node IN (
                SELECT id FROM graph_nodes WHERE node_type = 'task' AND last_seen < $1
            )
            "#,
        )
        .bind(before)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM graph_nodes WHERE node_type = 'task' AND last_seen < $1")
            .bind(before)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn q_values(&self, state: &StateKey) -> Result<HashMap<StrategyId, f64>, StoreError> {
        let rows = sqlx::query("SELECT strategy_id, q_value FROM q_values WHERE state_key = $1")
            .bind(state.encode())
            .fetch_all(&self.pool)
            .await?;
        decode_q_row(&rows)
    }

    async fn apply_q_update(&self, update: &QUpdate) -> Result<f64, StoreError> {
        let state_key = update.state.encode();
        let mut tx = self.pool.begin().await?;

        // Serializes updates of one state across engine instances
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&state_key)
            .execute(&mut *tx)
            .await?;
        let rows = sqlx::query("SELECT strategy_id, q_value FROM q_values WHERE state_key = $1")
            .bind(&state_key)
            .fetch_all(&mut *tx)
            .await?;
        let value = update.apply(&decode_q_row(&rows)?);

        sqlx::query(
            r#"
            INSERT INTO q_values (state_key, strategy_id, q_value, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (state_key, strategy_id) DO UPDATE SET
                q_value = EXCLUDED.q_value,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&state_key)
        .bind(update.strategy_id.0)
        .bind(value)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to save Q-value: {}", e)))?;

        tx.commit().await?;
        Ok(value)
    }

    async fn delete_q_values(&self, strategy_id: StrategyId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM q_values WHERE strategy_id = $1")
            .bind(strategy_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn put_ab_test(&self, test: &AbTest) -> Result<(), StoreError> {
        let payload = serde_json::to_value(test)?;
        let status = if test.is_active() { "active" } else { "concluded" };
        sqlx::query(
            r#"
            INSERT INTO ab_tests (id, domain, key, status, created_at, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, payload = EXCLUDED.payload
            "#,
        )
        .bind(test.id.0)
        .bind(test.domain.as_str())
        .bind(&test.key)
        .bind(status)
        .bind(test.created_at)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_ab_test(&self, id: AbTestId) -> Result<Option<AbTest>, StoreError> {
        let row = sqlx::query("SELECT payload FROM ab_tests WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_payload).transpose()
    }

    async fn list_ab_tests(&self, domain: Option<LearningDomain>) -> Result<Vec<AbTest>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM ab_tests
            WHERE ($1::text IS NULL OR domain = $1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(domain.map(|d| d.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|row| decode_payload(row)).collect()
    }
}
