// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use safla_engine::application::engine::{Collaborators, LearningEngine};
use safla_engine::domain::ab_test::{AbTest, AbTestId};
use safla_engine::domain::config::EngineConfigSpec;
use safla_engine::domain::graph::{KnowledgeEdge, KnowledgeNode};
use safla_engine::domain::knowledge::ConsolidatedKnowledge;
use safla_engine::domain::learning_state::{QUpdate, StateKey};
use safla_engine::domain::repository::StaleEventCount;
use safla_engine::domain::strategy::{Strategy, StrategyId};
use safla_engine::infrastructure::memory_store::InMemoryOutcomeStore;
use safla_engine::{
    ActionExecutor, ActionResult, ErrorDetails, ErrorKind, EventId, EventQuery, LearningDomain, LearningEvent, Outcome, OutcomeStore,
    SelectorDiscovery, StoreError,
};

/// In-memory store with switchable faults
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryOutcomeStore,
    fail_appends: AtomicBool,
    conflicts_remaining: AtomicU32,
    read_delay_ms: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// The next `n` versioned strategy updates report a conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.conflicts_remaining.store(n, Ordering::SeqCst);
    }

    pub fn slow_reads(&self, delay: Duration) {
        self.read_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub async fn event_count(&self) -> usize {
        self.inner.event_count().await
    }

    pub async fn q_state_count(&self) -> usize {
        self.inner.q_state_count().await
    }

    async fn maybe_delay(&self) {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl OutcomeStore for FlakyStore {
    async fn append(&self, event: &LearningEvent) -> Result<EventId, StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("append rejected".to_string()));
        }
        self.inner.append(event).await
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<LearningEvent>, StoreError> {
        self.inner.query(query).await
    }

    async fn stale_event_counts(&self, before: DateTime<Utc>) -> Result<Vec<StaleEventCount>, StoreError> {
        self.inner.stale_event_counts(before).await
    }

    async fn prune_events(&self, domain: LearningDomain, key: &str, before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.prune_events(domain, key, before).await
    }

    async fn get_strategy(&self, domain: LearningDomain, key: &str) -> Result<Option<Strategy>, StoreError> {
        self.maybe_delay().await;
        self.inner.get_strategy(domain, key).await
    }

    async fn find_strategy(&self, id: StrategyId) -> Result<Option<Strategy>, StoreError> {
        self.maybe_delay().await;
        self.inner.find_strategy(id).await
    }

    async fn find_strategies(&self, domain: LearningDomain, key: &str) -> Result<Vec<Strategy>, StoreError> {
        self.maybe_delay().await;
        self.inner.find_strategies(domain, key).await
    }

    async fn list_strategies(&self, domain: Option<LearningDomain>) -> Result<Vec<Strategy>, StoreError> {
        self.inner.list_strategies(domain).await
    }

    async fn put_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
        self.inner.put_strategy(strategy).await
    }

    async fn put_strategy_if_version(&self, strategy: &Strategy, expected: Option<u64>) -> Result<(), StoreError> {
        if expected.is_some()
            && self
                .conflicts_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StoreError::VersionConflict {
                id: strategy.id.to_string(),
                expected,
                found: expected.map(|v| v + 1),
            });
        }
        self.inner.put_strategy_if_version(strategy, expected).await
    }

    async fn put_knowledge(&self, knowledge: &ConsolidatedKnowledge) -> Result<(), StoreError> {
        self.inner.put_knowledge(knowledge).await
    }

    async fn list_knowledge(&self, domain: Option<LearningDomain>) -> Result<Vec<ConsolidatedKnowledge>, StoreError> {
        self.inner.list_knowledge(domain).await
    }

    async fn put_node(&self, node: &KnowledgeNode) -> Result<(), StoreError> {
        self.inner.put_node(node).await
    }

    async fn put_edge(&self, edge: &KnowledgeEdge) -> Result<(), StoreError> {
        self.inner.put_edge(edge).await
    }

    async fn list_nodes(&self) -> Result<Vec<KnowledgeNode>, StoreError> {
        self.inner.list_nodes().await
    }

    async fn list_edges(&self) -> Result<Vec<KnowledgeEdge>, StoreError> {
        self.inner.list_edges().await
    }

    async fn prune_task_nodes(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.prune_task_nodes(before).await
    }

    async fn q_values(&self, state: &StateKey) -> Result<HashMap<StrategyId, f64>, StoreError> {
        self.inner.q_values(state).await
    }

    async fn apply_q_update(&self, update: &QUpdate) -> Result<f64, StoreError> {
        self.inner.apply_q_update(update).await
    }

    async fn delete_q_values(&self, strategy_id: StrategyId) -> Result<u64, StoreError> {
        self.inner.delete_q_values(strategy_id).await
    }

    async fn put_ab_test(&self, test: &AbTest) -> Result<(), StoreError> {
        self.inner.put_ab_test(test).await
    }

    async fn get_ab_test(&self, id: AbTestId) -> Result<Option<AbTest>, StoreError> {
        self.inner.get_ab_test(id).await
    }

    async fn list_ab_tests(&self, domain: Option<LearningDomain>) -> Result<Vec<AbTest>, StoreError> {
        self.inner.list_ab_tests(domain).await
    }
}

/// Discovery collaborator that remembers every request
#[derive(Default)]
pub struct RecordingDiscovery {
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl SelectorDiscovery for RecordingDiscovery {
    async fn request_replacements(&self, key: &str, selectors: &[String]) -> anyhow::Result<()> {
        self.calls.lock().await.push((key.to_string(), selectors.to_vec()));
        Ok(())
    }
}

/// Executor whose every action succeeds after `duration`
pub struct SucceedingExecutor {
    pub duration: Duration,
}

#[async_trait]
impl ActionExecutor for SucceedingExecutor {
    async fn execute_action(&self, _strategy: &Strategy) -> anyhow::Result<ActionResult> {
        Ok(ActionResult::succeeded(self.duration))
    }
}

/// Deterministic configuration: fixed seed, no random consolidation
pub fn test_config(seed: u64) -> EngineConfigSpec {
    let mut config = EngineConfigSpec::default();
    config.learning.seed = Some(seed);
    config.consolidation.random_trigger_probability = 0.0;
    config
}

pub fn engine_with(store: Arc<dyn OutcomeStore>, config: EngineConfigSpec) -> LearningEngine {
    LearningEngine::new(store, config, Collaborators::default())
}

pub fn success(domain: LearningDomain, key: &str) -> LearningEvent {
    LearningEvent::new("agent-1", domain, key, "task", Outcome::success())
}

pub fn failure(domain: LearningDomain, key: &str, kind: ErrorKind) -> LearningEvent {
    LearningEvent::new(
        "agent-1",
        domain,
        key,
        "task",
        Outcome::failure(ErrorDetails::new(kind, "task failed")),
    )
}
