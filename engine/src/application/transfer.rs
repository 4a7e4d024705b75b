// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Knowledge Graph & Transfer Learning
//!
//! Keeps an in-process index of the task graph (tasks, the actor/issuer they
//! belong to, their requirements and the strategies they succeeded on) and
//! answers "which past successes look like this new task". The store holds
//! the durable copy; the index is rebuilt from it on first use.
//!
//! Similarity between two tasks:
//!
//! ```text
//! 0.4 * same (domain, key) + 0.3 * same category + 0.3 * Jaccard(requirements)
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::domain::config::SelectionConfig;
use crate::domain::error::EngineError;
use crate::domain::event::{LearningDomain, LearningEvent, TaskContext};
pub use crate::domain::event::{CATEGORY_FIELD, REQUIREMENTS_FIELD, TASK_ID_FIELD};
use crate::domain::graph::{EdgeKind, KnowledgeEdge, KnowledgeNode, NodeId, NodeKind};
use crate::domain::repository::OutcomeStore;
use crate::domain::strategy::StrategyId;

/// Transfer-relevant description of a task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskProfile {
    pub task_id: Option<String>,
    pub domain: LearningDomain,
    pub key: String,
    pub category: Option<String>,
    pub requirements: BTreeSet<String>,
}

impl TaskProfile {
    /// Profile from a task context. `None` when the context carries nothing
    /// to compare on.
    pub fn from_context(domain: LearningDomain, key: &str, context: &TaskContext) -> Option<Self> {
        let task_id = context.get(TASK_ID_FIELD).and_then(|v| v.as_category());
        let category = context.get(CATEGORY_FIELD).and_then(|v| v.as_category());
        let requirements: BTreeSet<String> = context
            .get(REQUIREMENTS_FIELD)
            .and_then(|v| v.as_list())
            .map(|list| list.iter().map(|r| r.trim().to_lowercase()).filter(|r| !r.is_empty()).collect())
            .unwrap_or_default();

        if task_id.is_none() && category.is_none() && requirements.is_empty() {
            return None;
        }
        Some(Self {
            task_id,
            domain,
            key: key.to_string(),
            category,
            requirements,
        })
    }

    pub fn from_event(event: &LearningEvent) -> Option<Self> {
        Self::from_context(event.domain, &event.key, &event.context)
    }

    pub fn similarity(&self, other: &TaskProfile) -> f64 {
        let mut score = 0.0;
        if self.domain == other.domain && self.key == other.key {
            score += 0.4;
        }
        if let (Some(a), Some(b)) = (&self.category, &other.category) {
            if a == b {
                score += 0.3;
            }
        }
        score + 0.3 * jaccard(&self.requirements, &other.requirements)
    }
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferCandidate {
    pub task_id: String,
    pub key: String,
    pub similarity: f64,
    pub strategy_id: StrategyId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult {
    /// Most similar first
    pub candidates: Vec<TransferCandidate>,
    pub confidence: f64,
}

impl TransferResult {
    pub fn best(&self) -> Option<&TransferCandidate> {
        self.candidates.first()
    }
}

#[derive(Default)]
struct GraphIndex {
    nodes: HashMap<NodeId, KnowledgeNode>,
    outgoing: HashMap<NodeId, Vec<KnowledgeEdge>>,
}

impl GraphIndex {
    fn upsert_node(&mut self, node: KnowledgeNode) {
        self.nodes.insert(node.id, node);
    }

    fn upsert_edge(&mut self, edge: KnowledgeEdge) {
        let edges = self.outgoing.entry(edge.from).or_default();
        match edges.iter_mut().find(|e| e.id == edge.id) {
            Some(existing) => *existing = edge,
            None => edges.push(edge),
        }
    }

    fn profile_of(&self, node: &KnowledgeNode) -> Option<TaskProfile> {
        match &node.kind {
            NodeKind::Task {
                task_id,
                domain,
                key,
                category,
                requirements,
                ..
            } => Some(TaskProfile {
                task_id: Some(task_id.clone()),
                domain: *domain,
                key: key.clone(),
                category: category.clone(),
                requirements: requirements.iter().map(|r| r.to_lowercase()).collect(),
            }),
            _ => None,
        }
    }

    /// Strongest strategy a task succeeded on, following SUCCEEDED_ON edges
    fn successful_strategy(&self, task: NodeId) -> Option<StrategyId> {
        self.outgoing
            .get(&task)?
            .iter()
            .filter(|e| e.kind == EdgeKind::SucceededOn)
            .max_by(|a, b| a.weight.total_cmp(&b.weight).then(a.last_used.cmp(&b.last_used)))
            .and_then(|e| match self.nodes.get(&e.to).map(|n| &n.kind) {
                Some(NodeKind::Strategy { strategy_id, .. }) => Some(*strategy_id),
                _ => None,
            })
    }
}

pub struct KnowledgeGraph {
    store: Arc<dyn OutcomeStore>,
    config: SelectionConfig,
    index: RwLock<GraphIndex>,
    loaded: OnceCell<()>,
}

impl KnowledgeGraph {
    pub fn new(store: Arc<dyn OutcomeStore>, config: SelectionConfig) -> Self {
        Self {
            store,
            config,
            index: RwLock::new(GraphIndex::default()),
            loaded: OnceCell::new(),
        }
    }

    async fn ensure_loaded(&self) -> Result<(), EngineError> {
        self.loaded.get_or_try_init(|| self.rebuild()).await?;
        Ok(())
    }

    /// Reload the index from the store
    pub async fn rebuild(&self) -> Result<(), EngineError> {
        let nodes = self.store.list_nodes().await?;
        let edges = self.store.list_edges().await?;
        let mut index = GraphIndex::default();
        let (node_count, edge_count) = (nodes.len(), edges.len());
        for node in nodes {
            index.upsert_node(node);
        }
        for edge in edges {
            index.upsert_edge(edge);
        }
        *self.index.write() = index;
        info!(nodes = node_count, edges = edge_count, "Knowledge graph index rebuilt");
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.index.read().nodes.len()
    }

    /// Fold one recorded outcome into the graph. Events without a `task_id`
    /// are ignored, since repeated outcomes of one task must land on one node.
    /// Returns whether the graph changed.
    pub async fn observe(&self, event: &LearningEvent, strategy_id: StrategyId) -> Result<bool, EngineError> {
        let Some(profile) = TaskProfile::from_event(event) else {
            return Ok(false);
        };
        let Some(task_id) = profile.task_id.clone() else {
            debug!(domain = %event.domain, key = %event.key, "No task_id in context, graph unchanged");
            return Ok(false);
        };
        self.ensure_loaded().await?;

        let (nodes, edges) = {
            let index = self.index.read();
            build_task_subgraph(&index, &profile, task_id, event.outcome.success, strategy_id)
        };

        for node in &nodes {
            self.store.put_node(node).await?;
        }
        for edge in &edges {
            self.store.put_edge(edge).await?;
        }

        let mut index = self.index.write();
        for node in nodes {
            index.upsert_node(node);
        }
        for edge in edges {
            index.upsert_edge(edge);
        }
        debug!(domain = %event.domain, key = %event.key, "Task observed in knowledge graph");
        Ok(true)
    }

    /// Drop task nodes not seen since `cutoff`, with their outgoing edges.
    /// Requirement, actor and strategy nodes are shared and stay.
    pub async fn forget_tasks_before(&self, cutoff: DateTime<Utc>) -> Result<u64, EngineError> {
        let removed = self.store.prune_task_nodes(cutoff).await?;
        if removed > 0 && self.loaded.initialized() {
            let mut index = self.index.write();
            let stale: Vec<NodeId> = index
                .nodes
                .values()
                .filter(|n| matches!(n.kind, NodeKind::Task { .. }) && n.last_seen < cutoff)
                .map(|n| n.id)
                .collect();
            for id in stale {
                index.nodes.remove(&id);
                index.outgoing.remove(&id);
            }
        }
        if removed > 0 {
            info!(removed, %cutoff, "Forgot stale task nodes");
        }
        Ok(removed)
    }

    /// Successful past tasks similar to `profile`, best first
    pub async fn find_transfer_candidates(&self, profile: &TaskProfile) -> Result<TransferResult, EngineError> {
        self.ensure_loaded().await?;
        let index = self.index.read();

        let mut scored: Vec<TransferCandidate> = index
            .nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Task { succeeded: true, .. }))
            .filter_map(|node| {
                let other = index.profile_of(node)?;
                if other.domain != profile.domain {
                    return None;
                }
                if profile.task_id.is_some() && other.task_id == profile.task_id {
                    return None;
                }
                let similarity = profile.similarity(&other);
                if similarity <= self.config.transfer_similarity_threshold {
                    return None;
                }
                let strategy_id = index.successful_strategy(node.id)?;
                Some(TransferCandidate {
                    task_id: other.task_id.unwrap_or_default(),
                    key: other.key,
                    similarity,
                    strategy_id,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        scored.truncate(self.config.transfer_top_k);

        let confidence = if scored.is_empty() {
            0.0
        } else {
            let average = scored.iter().map(|c| c.similarity).sum::<f64>() / scored.len() as f64;
            (average * scored.len() as f64 / 5.0).min(0.9)
        };
        Ok(TransferResult {
            candidates: scored,
            confidence,
        })
    }
}

fn build_task_subgraph(
    index: &GraphIndex,
    profile: &TaskProfile,
    task_id: String,
    success: bool,
    strategy_id: StrategyId,
) -> (Vec<KnowledgeNode>, Vec<KnowledgeEdge>) {
    let mut task = KnowledgeNode::new(NodeKind::Task {
        task_id,
        domain: profile.domain,
        key: profile.key.clone(),
        category: profile.category.clone(),
        requirements: profile.requirements.iter().cloned().collect(),
        succeeded: success,
        strategy_id: success.then_some(strategy_id),
    });

    // A task that succeeded once stays a success and keeps its first timestamp
    if let Some(existing) = index.nodes.get(&task.id) {
        task.created_at = existing.created_at;
        if let (
            NodeKind::Task {
                succeeded: was_success,
                strategy_id: previous,
                ..
            },
            NodeKind::Task {
                succeeded,
                strategy_id: current,
                ..
            },
        ) = (&existing.kind, &mut task.kind)
        {
            *succeeded |= *was_success;
            if current.is_none() {
                *current = *previous;
            }
        }
    }

    let actor = KnowledgeNode::new(NodeKind::ActorDomain {
        domain: profile.domain,
        key: profile.key.clone(),
    });
    let mut edges = vec![KnowledgeEdge::new(task.id, actor.id, EdgeKind::IssuedBy, 1.0)];
    let mut nodes = Vec::new();

    for requirement in &profile.requirements {
        let node = KnowledgeNode::new(NodeKind::Requirement {
            name: requirement.clone(),
        });
        edges.push(KnowledgeEdge::new(task.id, node.id, EdgeKind::Requires, 1.0));
        nodes.push(node);
    }

    if success {
        let strategy = KnowledgeNode::new(NodeKind::Strategy {
            strategy_id,
            domain: profile.domain,
            key: profile.key.clone(),
        });
        let mut edge = KnowledgeEdge::new(task.id, strategy.id, EdgeKind::SucceededOn, 0.5);
        if let Some(existing) = index
            .outgoing
            .get(&task.id)
            .and_then(|edges| edges.iter().find(|e| e.id == edge.id))
        {
            edge = existing.clone();
            edge.reinforce(0.1);
        }
        edges.push(edge);
        nodes.push(strategy);
    }

    for node in nodes.iter_mut().chain(std::iter::once(&mut task)) {
        node.last_seen = Utc::now();
    }
    nodes.push(actor);
    nodes.push(task);
    (nodes, edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{ErrorDetails, ErrorKind, Outcome};
    use crate::infrastructure::memory_store::InMemoryOutcomeStore;

    fn rfp(task_id: &str, key: &str, category: &str, requirements: &[&str], success: bool) -> LearningEvent {
        let outcome = if success {
            Outcome::success()
        } else {
            Outcome::failure(ErrorDetails::new(ErrorKind::Other, "lost"))
        };
        LearningEvent::new("writer", LearningDomain::ProposalGeneration, key, "bid", outcome)
            .with_context(TASK_ID_FIELD, task_id)
            .with_context(CATEGORY_FIELD, category)
            .with_context(
                REQUIREMENTS_FIELD,
                requirements.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            )
    }

    fn graph(store: Arc<InMemoryOutcomeStore>) -> KnowledgeGraph {
        KnowledgeGraph::new(store, SelectionConfig::default())
    }

    #[test]
    fn test_similarity_weights() {
        let a = TaskProfile::from_event(&rfp("1", "gsa", "it", &["sam", "iso"], true)).unwrap();
        let b = TaskProfile::from_event(&rfp("2", "gsa", "it", &["sam", "iso"], true)).unwrap();
        assert!((a.similarity(&b) - 1.0).abs() < 1e-9);

        let c = TaskProfile::from_event(&rfp("3", "dod", "it", &["sam"], true)).unwrap();
        assert!((a.similarity(&c) - (0.3 + 0.3 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_profile_requires_some_signal() {
        let event = LearningEvent::new("w", LearningDomain::ProposalGeneration, "gsa", "bid", Outcome::success());
        assert!(TaskProfile::from_event(&event).is_none());
    }

    #[tokio::test]
    async fn test_transfer_candidates_ranked_and_capped() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let graph = graph(store.clone());
        let strategy = StrategyId::new();

        for (i, reqs) in [&["sam", "iso"][..], &["sam"][..], &["sam", "iso"][..], &["fedramp"][..]]
            .iter()
            .enumerate()
        {
            graph
                .observe(&rfp(&format!("past-{}", i), "gsa", "it", reqs, true), strategy)
                .await
                .unwrap();
        }
        graph
            .observe(&rfp("lost-1", "gsa", "it", &["sam", "iso"], false), strategy)
            .await
            .unwrap();

        let profile = TaskProfile::from_event(&rfp("new", "gsa", "it", &["sam", "iso"], true)).unwrap();
        let result = graph.find_transfer_candidates(&profile).await.unwrap();

        assert_eq!(result.candidates.len(), 3);
        assert!(result.candidates.iter().all(|c| c.task_id != "lost-1"));
        assert!((result.candidates[0].similarity - 1.0).abs() < 1e-9);
        assert!(result.confidence > 0.0 && result.confidence <= 0.9);
        assert_eq!(result.best().map(|c| c.strategy_id), Some(strategy));
    }

    #[tokio::test]
    async fn test_index_rebuilds_from_store() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let strategy = StrategyId::new();
        graph(store.clone())
            .observe(&rfp("past", "gsa", "it", &["sam"], true), strategy)
            .await
            .unwrap();

        let fresh = graph(store);
        let profile = TaskProfile::from_event(&rfp("new", "gsa", "it", &["sam"], true)).unwrap();
        let result = fresh.find_transfer_candidates(&profile).await.unwrap();
        assert_eq!(result.candidates.len(), 1);
        assert!(fresh.node_count() >= 4);
    }

    #[tokio::test]
    async fn test_outcomes_without_task_id_add_no_nodes() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let graph = graph(store.clone());
        for _ in 0..20 {
            let event = LearningEvent::new("w", LearningDomain::ProposalGeneration, "gsa", "bid", Outcome::success())
                .with_context(CATEGORY_FIELD, "it")
                .with_context(REQUIREMENTS_FIELD, vec!["sam".to_string()]);
            assert!(!graph.observe(&event, StrategyId::new()).await.unwrap());
        }
        assert_eq!(graph.node_count(), 0);
        assert!(store.list_nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_task_reuses_its_node() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let graph = graph(store.clone());
        let strategy = StrategyId::new();
        for _ in 0..5 {
            graph
                .observe(&rfp("rfp-7", "gsa", "it", &["sam"], true), strategy)
                .await
                .unwrap();
        }
        let tasks = store
            .list_nodes()
            .await
            .unwrap()
            .into_iter()
            .filter(|n| matches!(n.kind, NodeKind::Task { .. }))
            .count();
        assert_eq!(tasks, 1);
    }

    #[tokio::test]
    async fn test_forget_tasks_before_cutoff() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let graph = graph(store.clone());
        let strategy = StrategyId::new();
        graph
            .observe(&rfp("old", "gsa", "it", &["sam"], true), strategy)
            .await
            .unwrap();
        let cutoff = Utc::now() + chrono::Duration::milliseconds(1);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        graph
            .observe(&rfp("recent", "gsa", "it", &["sam"], true), strategy)
            .await
            .unwrap();

        assert_eq!(graph.forget_tasks_before(cutoff).await.unwrap(), 1);
        let profile = TaskProfile::from_event(&rfp("new", "gsa", "it", &["sam"], true)).unwrap();
        let result = graph.find_transfer_candidates(&profile).await.unwrap();
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].task_id, "recent");

        let fresh = self::graph(store);
        let result = fresh.find_transfer_candidates(&profile).await.unwrap();
        assert_eq!(result.candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_tasks_do_not_transfer() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let graph = graph(store);
        graph
            .observe(&rfp("past", "gsa", "it", &["sam"], false), StrategyId::new())
            .await
            .unwrap();
        let profile = TaskProfile::from_event(&rfp("new", "gsa", "it", &["sam"], true)).unwrap();
        assert!(graph.find_transfer_candidates(&profile).await.unwrap().candidates.is_empty());
    }
}
