// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Outcome Store Contract
//!
//! Persistence contract for everything the engine stores. The interface lives
//! in the domain layer; implementations live in `crate::infrastructure`.
//!
//! | Implementation | Backend |
//! |----------------|---------|
//! | `InMemoryOutcomeStore` | Process-local hash maps (development, tests) |
//! | `PostgresOutcomeStore` | PostgreSQL with JSONB payload columns |
//!
//! Learning events are append-only. Strategies are written last-write-wins by
//! [`OutcomeStore::put_strategy`]; callers that need read-modify-write go
//! through the strategy repository, which uses
//! [`OutcomeStore::put_strategy_if_version`] under a per-key lock. Q-table
//! updates are read-modify-write inside the store so concurrent recorders
//! never lose an update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::domain::ab_test::{AbTest, AbTestId};
use crate::domain::error::StoreError;
use crate::domain::event::{EventId, LearningDomain, LearningEvent};
use crate::domain::graph::{KnowledgeEdge, KnowledgeNode};
use crate::domain::knowledge::ConsolidatedKnowledge;
use crate::domain::learning_state::{QUpdate, StateKey};
use crate::domain::strategy::{Strategy, StrategyId};

/// Filter for [`OutcomeStore::query`]. Results are returned newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    pub domain: Option<LearningDomain>,
    pub key: Option<String>,
    pub actor_id: Option<String>,
    /// Inclusive lower bound on `timestamp`
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `timestamp`
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn for_domain(domain: LearningDomain) -> Self {
        Self {
            domain: Some(domain),
            ..Default::default()
        }
    }

    pub fn for_actor(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            ..Default::default()
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` passes every filter except `limit`
    pub fn matches(&self, event: &LearningEvent) -> bool {
        self.domain.is_none_or(|d| d == event.domain)
            && self.key.as_deref().is_none_or(|k| k == event.key)
            && self.actor_id.as_deref().is_none_or(|a| a == event.actor_id)
            && self.since.is_none_or(|s| event.timestamp >= s)
            && self.before.is_none_or(|b| event.timestamp < b)
    }
}

/// Number of events for one `(domain, key)` older than a cutoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleEventCount {
    pub domain: LearningDomain,
    pub key: String,
    pub count: usize,
}

#[async_trait]
pub trait OutcomeStore: Send + Sync {
    // Learning events

    async fn append(&self, event: &LearningEvent) -> Result<EventId, StoreError>;

    async fn query(&self, query: &EventQuery) -> Result<Vec<LearningEvent>, StoreError>;

    /// Per-key counts of events with `timestamp < before`
    async fn stale_event_counts(&self, before: DateTime<Utc>) -> Result<Vec<StaleEventCount>, StoreError>;

    /// Delete events of one key older than `before`; returns the number removed
    async fn prune_events(
        &self,
        domain: LearningDomain,
        key: &str,
        before: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    // Strategies

    /// Primary strategy for a key: the earliest created, non-archived variant
    async fn get_strategy(&self, domain: LearningDomain, key: &str) -> Result<Option<Strategy>, StoreError>;

    async fn find_strategy(&self, id: StrategyId) -> Result<Option<Strategy>, StoreError>;

    /// Every variant for a key, archived included, oldest first
    async fn find_strategies(&self, domain: LearningDomain, key: &str) -> Result<Vec<Strategy>, StoreError>;

    async fn list_strategies(&self, domain: Option<LearningDomain>) -> Result<Vec<Strategy>, StoreError>;

    /// Unconditional write (last-write-wins)
    async fn put_strategy(&self, strategy: &Strategy) -> Result<(), StoreError>;

    /// Write only if the stored version equals `expected` (`None`: the strategy
    /// must not exist yet). Fails with [`StoreError::VersionConflict`] otherwise.
    async fn put_strategy_if_version(&self, strategy: &Strategy, expected: Option<u64>) -> Result<(), StoreError>;

    // Consolidated knowledge

    async fn put_knowledge(&self, knowledge: &ConsolidatedKnowledge) -> Result<(), StoreError>;

    async fn list_knowledge(&self, domain: Option<LearningDomain>) -> Result<Vec<ConsolidatedKnowledge>, StoreError>;

    // Knowledge graph

    async fn put_node(&self, node: &KnowledgeNode) -> Result<(), StoreError>;

    async fn put_edge(&self, edge: &KnowledgeEdge) -> Result<(), StoreError>;

    async fn list_nodes(&self) -> Result<Vec<KnowledgeNode>, StoreError>;

    async fn list_edges(&self) -> Result<Vec<KnowledgeEdge>, StoreError>;

    /// Delete task nodes last seen before `before` together with their
    /// outgoing edges; returns the number of nodes removed
    async fn prune_task_nodes(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

    // Q-table

    /// Q-values of every strategy tried in `state`
    async fn q_values(&self, state: &StateKey) -> Result<HashMap<StrategyId, f64>, StoreError>;

    /// Apply `update` to the stored row as one atomic step and return the
    /// entry's new value
    async fn apply_q_update(&self, update: &QUpdate) -> Result<f64, StoreError>;

    /// Forget a strategy in every state; returns the number of entries removed
    async fn delete_q_values(&self, strategy_id: StrategyId) -> Result<u64, StoreError>;

    // A/B tests

    async fn put_ab_test(&self, test: &AbTest) -> Result<(), StoreError>;

    async fn get_ab_test(&self, id: AbTestId) -> Result<Option<AbTest>, StoreError>;

    async fn list_ab_tests(&self, domain: Option<LearningDomain>) -> Result<Vec<AbTest>, StoreError>;
}
