// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Knowledge graph entities used for transfer-learning similarity lookup.
//! The graph is a derived index: it can be rebuilt from learning events at any
//! time and is never authoritative. Cycles are allowed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::LearningDomain;
use crate::domain::strategy::StrategyId;

/// Node identifier in the knowledge graph.
///
/// Ids are derived from the node's natural key (UUID v5), so observing the same
/// task or requirement twice lands on the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn from_natural_key(natural_key: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, natural_key.as_bytes()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    pub fn between(from: NodeId, to: NodeId, kind: EdgeKind) -> Self {
        let natural = format!("{}:{}:{}", from.0, kind.as_str(), to.0);
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, natural.as_bytes()))
    }
}

/// Type of node in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// One executed task (an RFP, a portal scan, a parsed document)
    Task {
        task_id: String,
        domain: LearningDomain,
        /// Domain key the task ran under, e.g. the issuing agency
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(default)]
        requirements: Vec<String>,
        succeeded: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strategy_id: Option<StrategyId>,
    },

    /// Actor or issuing entity a task belongs to
    ActorDomain { domain: LearningDomain, key: String },

    /// A requirement shared between tasks
    Requirement { name: String },

    /// A strategy variant that produced successful tasks
    Strategy {
        strategy_id: StrategyId,
        domain: LearningDomain,
        key: String,
    },
}

impl NodeKind {
    /// Natural key the node id is derived from
    pub fn natural_key(&self) -> String {
        match self {
            NodeKind::Task { domain, task_id, .. } => format!("task:{}:{}", domain, task_id),
            NodeKind::ActorDomain { domain, key } => format!("actor:{}:{}", domain, key),
            NodeKind::Requirement { name } => format!("requirement:{}", name.to_lowercase()),
            NodeKind::Strategy { strategy_id, .. } => format!("strategy:{}", strategy_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl KnowledgeNode {
    pub fn new(kind: NodeKind) -> Self {
        let now = Utc::now();
        Self {
            id: NodeId::from_natural_key(&kind.natural_key()),
            kind,
            weight: 1.0,
            created_at: now,
            last_seen: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    IssuedBy,
    Requires,
    SucceededOn,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::IssuedBy => "ISSUED_BY",
            EdgeKind::Requires => "REQUIRES",
            EdgeKind::SucceededOn => "SUCCEEDED_ON",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEdge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
    /// Association strength in [0, 1]
    pub weight: f64,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl KnowledgeEdge {
    pub fn new(from: NodeId, to: NodeId, kind: EdgeKind, weight: f64) -> Self {
        let now = Utc::now();
        Self {
            id: EdgeId::between(from, to, kind),
            from,
            to,
            kind,
            weight: weight.clamp(0.0, 1.0),
            created_at: now,
            last_used: now,
        }
    }

    /// Increase weight, saturating at 1.0
    pub fn reinforce(&mut self, amount: f64) {
        self.weight = (self.weight + amount).clamp(0.0, 1.0);
        self.last_used = Utc::now();
    }

    /// Decrease weight, floored at 0.0
    pub fn weaken(&mut self, amount: f64) {
        self.weight = (self.weight - amount).clamp(0.0, 1.0);
        self.last_used = Utc::now();
    }
}
