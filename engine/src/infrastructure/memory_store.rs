// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory outcome store for development and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::ab_test::{AbTest, AbTestId};
use crate::domain::error::StoreError;
use crate::domain::event::{EventId, LearningDomain, LearningEvent};
use crate::domain::graph::{EdgeId, KnowledgeEdge, KnowledgeNode, NodeId, NodeKind};
use crate::domain::knowledge::ConsolidatedKnowledge;
use crate::domain::learning_state::{QUpdate, StateKey};
use crate::domain::repository::{EventQuery, OutcomeStore, StaleEventCount};
use crate::domain::strategy::{Strategy, StrategyId};

/// Process-local implementation of [`OutcomeStore`]
pub struct InMemoryOutcomeStore {
    events: Arc<RwLock<Vec<LearningEvent>>>,
    strategies: Arc<RwLock<HashMap<StrategyId, Strategy>>>,
    knowledge: Arc<RwLock<HashMap<Uuid, ConsolidatedKnowledge>>>,
    nodes: Arc<RwLock<HashMap<NodeId, KnowledgeNode>>>,
    edges: Arc<RwLock<HashMap<EdgeId, KnowledgeEdge>>>,
    ab_tests: Arc<RwLock<HashMap<AbTestId, AbTest>>>,
    q_table: Arc<RwLock<HashMap<StateKey, HashMap<StrategyId, f64>>>>,
}

impl InMemoryOutcomeStore {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            strategies: Arc::new(RwLock::new(HashMap::new())),
            knowledge: Arc::new(RwLock::new(HashMap::new())),
            nodes: Arc::new(RwLock::new(HashMap::new())),
            edges: Arc::new(RwLock::new(HashMap::new())),
            ab_tests: Arc::new(RwLock::new(HashMap::new())),
            q_table: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Number of distinct states in the Q-table
    pub async fn q_state_count(&self) -> usize {
        self.q_table.read().await.len()
    }
}

impl Default for InMemoryOutcomeStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_creation(mut strategies: Vec<Strategy>) -> Vec<Strategy> {
    strategies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    strategies
}

#[async_trait]
impl OutcomeStore for InMemoryOutcomeStore {
    async fn append(&self, event: &LearningEvent) -> Result<EventId, StoreError> {
        let mut events = self.events.write().await;
        events.push(event.clone());
        Ok(event.id)
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<LearningEvent>, StoreError> {
        let events = self.events.read().await;
        let mut matching: Vec<LearningEvent> = events.iter().filter(|e| query.matches(e)).cloned().collect();
        // Newest first; ties resolve to the latest append
        matching.reverse();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = query.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn stale_event_counts(&self, before: DateTime<Utc>) -> Result<Vec<StaleEventCount>, StoreError> {
        let events = self.events.read().await;
        let mut counts: BTreeMap<(LearningDomain, String), usize> = BTreeMap::new();
        for event in events.iter().filter(|e| e.timestamp < before) {
            *counts.entry((event.domain, event.key.clone())).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((domain, key), count)| StaleEventCount { domain, key, count })
            .collect())
    }

    async fn prune_events(
        &self,
        domain: LearningDomain,
        key: &str,
        before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut events = self.events.write().await;
        let initial = events.len();
        events.retain(|e| !(e.domain == domain && e.key == key && e.timestamp < before));
        Ok((initial - events.len()) as u64)
    }

    async fn get_strategy(&self, domain: LearningDomain, key: &str) -> Result<Option<Strategy>, StoreError> {
        let strategies = self.find_strategies(domain, key).await?;
        Ok(strategies.into_iter().find(|s| !s.archived))
    }

    async fn find_strategy(&self, id: StrategyId) -> Result<Option<Strategy>, StoreError> {
        let strategies = self.strategies.read().await;
        Ok(strategies.get(&id).cloned())
    }

    async fn find_strategies(&self, domain: LearningDomain, key: &str) -> Result<Vec<Strategy>, StoreError> {
        let strategies = self.strategies.read().await;
        let matching = strategies
            .values()
            .filter(|s| s.domain == domain && s.key == key)
            .cloned()
            .collect();
        Ok(sorted_by_creation(matching))
    }

    async fn list_strategies(&self, domain: Option<LearningDomain>) -> Result<Vec<Strategy>, StoreError> {
        let strategies = self.strategies.read().await;
        let matching = strategies
            .values()
            .filter(|s| domain.is_none_or(|d| d == s.domain))
            .cloned()
            .collect();
        Ok(sorted_by_creation(matching))
    }

    async fn put_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
        let mut strategies = self.strategies.write().await;
        strategies.insert(strategy.id, strategy.clone());
        Ok(())
    }

    async fn put_strategy_if_version(&self, strategy: &Strategy, expected: Option<u64>) -> Result<(), StoreError> {
        let mut strategies = self.strategies.write().await;
        let found = strategies.get(&strategy.id).map(|s| s.version);
        if found != expected {
            return Err(StoreError::VersionConflict {
                id: strategy.id.to_string(),
                expected,
                found,
            });
        }
        strategies.insert(strategy.id, strategy.clone());
        Ok(())
    }

    async fn put_knowledge(&self, knowledge: &ConsolidatedKnowledge) -> Result<(), StoreError> {
        let mut entries = self.knowledge.write().await;
        entries.insert(knowledge.id, knowledge.clone());
        Ok(())
    }

    async fn list_knowledge(&self, domain: Option<LearningDomain>) -> Result<Vec<ConsolidatedKnowledge>, StoreError> {
        let entries = self.knowledge.read().await;
        let mut matching: Vec<ConsolidatedKnowledge> = entries
            .values()
            .filter(|k| domain.is_none_or(|d| d == k.domain))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn put_node(&self, node: &KnowledgeNode) -> Result<(), StoreError> {
        let mut nodes = self.nodes.write().await;
        nodes.insert(node.id, node.clone());
        Ok(())
    }

    async fn put_edge(&self, edge: &KnowledgeEdge) -> Result<(), StoreError> {
        let mut edges = self.edges.write().await;
        edges.insert(edge.id, edge.clone());
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<KnowledgeNode>, StoreError> {
        let nodes = self.nodes.read().await;
        Ok(nodes.values().cloned().collect())
    }

    async fn list_edges(&self) -> Result<Vec<KnowledgeEdge>, StoreError> {
        let edges = self.edges.read().await;
        Ok(edges.values().cloned().collect())
    }

    async fn prune_task_nodes(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut nodes = self.nodes.write().await;
        let doomed: Vec<NodeId> = nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Task { .. }) && n.last_seen < before)
            .map(|n| n.id)
            .collect();
        for id in &doomed {
            nodes.remove(id);
        }
        drop(nodes);

        let mut edges = self.edges.write().await;
        edges.retain(|_, e| !doomed.contains(&e.from));
        Ok(doomed.len() as u64)
    }

    async fn q_values(&self, state: &StateKey) -> Result<HashMap<StrategyId, f64>, StoreError> {
        let table = self.q_table.read().await;
        Ok(table.get(state).cloned().unwrap_or_default())
    }

    async fn apply_q_update(&self, update: &QUpdate) -> Result<f64, StoreError> {
        let mut table = self.q_table.write().await;
        let row = table.entry(update.state.clone()).or_default();
        let value = update.apply(row);
        row.insert(update.strategy_id, value);
        Ok(value)
    }

    async fn delete_q_values(&self, strategy_id: StrategyId) -> Result<u64, StoreError> {
        let mut table = self.q_table.write().await;
        let mut removed = 0;
        for row in table.values_mut() {
            if row.remove(&strategy_id).is_some() {
                removed += 1;
            }
        }
        table.retain(|_, row| !row.is_empty());
        Ok(removed)
    }

    async fn put_ab_test(&self, test: &AbTest) -> Result<(), StoreError> {
        let mut tests = self.ab_tests.write().await;
        tests.insert(test.id, test.clone());
        Ok(())
    }

    async fn get_ab_test(&self, id: AbTestId) -> Result<Option<AbTest>, StoreError> {
        let tests = self.ab_tests.read().await;
        Ok(tests.get(&id).cloned())
    }

    async fn list_ab_tests(&self, domain: Option<LearningDomain>) -> Result<Vec<AbTest>, StoreError> {
        let tests = self.ab_tests.read().await;
        let mut matching: Vec<AbTest> = tests
            .values()
            .filter(|t| domain.is_none_or(|d| d == t.domain))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }
}
