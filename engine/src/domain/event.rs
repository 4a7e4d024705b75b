// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Learning Events
//!
//! A [`LearningEvent`] is the immutable record of one automated task execution:
//! who ran it, under which strategy key, in which conditions, and how it went.
//! Events are created once, appended to the outcome store, and never mutated.
//! They are retained for a rolling window before the consolidation scheduler
//! folds them into [`ConsolidatedKnowledge`](crate::domain::knowledge::ConsolidatedKnowledge).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::error::EngineError;
use crate::domain::strategy::StrategyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Business area a strategy governs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LearningDomain {
    PortalNavigation,
    DocumentParsing,
    ProposalGeneration,
}

impl LearningDomain {
    pub const ALL: [LearningDomain; 3] = [
        LearningDomain::PortalNavigation,
        LearningDomain::DocumentParsing,
        LearningDomain::ProposalGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LearningDomain::PortalNavigation => "portal-navigation",
            LearningDomain::DocumentParsing => "document-parsing",
            LearningDomain::ProposalGeneration => "proposal-generation",
        }
    }
}

impl fmt::Display for LearningDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LearningDomain {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "portal-navigation" | "navigation" => Ok(LearningDomain::PortalNavigation),
            "document-parsing" | "parsing" => Ok(LearningDomain::DocumentParsing),
            "proposal-generation" | "proposal" => Ok(LearningDomain::ProposalGeneration),
            other => Err(EngineError::Validation(format!("unknown domain '{}'", other))),
        }
    }
}

/// Typed value describing one condition a task ran under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Flag(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl ContextValue {
    /// Category label used by the pattern analyzer. Numbers and lists are not
    /// categorical.
    pub fn as_category(&self) -> Option<String> {
        match self {
            ContextValue::Text(s) => Some(s.clone()),
            ContextValue::Flag(b) => Some(b.to_string()),
            ContextValue::Number(_) | ContextValue::List(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContextValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ContextValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ContextValue::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Text(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Flag(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        ContextValue::Number(value)
    }
}

impl From<Vec<String>> for ContextValue {
    fn from(value: Vec<String>) -> Self {
        ContextValue::List(value)
    }
}

/// Conditions map. Ordered so the serialized form is canonical.
pub type TaskContext = BTreeMap<String, ContextValue>;

/// Coarse failure classification reported by the executing collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    SelectorNotFound,
    Validation,
    Network,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub kind: ErrorKind,
    pub message: String,
    /// What the error was about, e.g. the selector key that failed to resolve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl ErrorDetails {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            success: true,
            metrics: HashMap::new(),
            error_details: None,
        }
    }

    pub fn failure(details: ErrorDetails) -> Self {
        Self {
            success: false,
            metrics: HashMap::new(),
            error_details: Some(details),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_details.as_ref().map(|d| d.kind)
    }

    /// Latency reported by the collaborator, if any
    pub fn latency_ms(&self) -> Option<f64> {
        self.metrics.get(LATENCY_METRIC).copied()
    }
}

/// Metric name carrying task duration in milliseconds
pub const LATENCY_METRIC: &str = "latency_ms";

/// Context field naming the business task (RFP number, document id)
pub const TASK_ID_FIELD: &str = "task_id";
/// Context field with the task's category label
pub const CATEGORY_FIELD: &str = "category";
/// Context field listing the task's requirements
pub const REQUIREMENTS_FIELD: &str = "requirements";

/// Immutable record of one task execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEvent {
    pub id: EventId,
    pub actor_id: String,
    pub domain: LearningDomain,
    /// Strategy key the task ran under (portal id, document type, agency/RFP type)
    pub key: String,
    /// Variant that was used, when the caller selected one explicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<StrategyId>,
    pub task_type: String,
    #[serde(default)]
    pub context: TaskContext,
    pub outcome: Outcome,
    /// Explicit reward; derived from the outcome when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl LearningEvent {
    pub fn new(
        actor_id: impl Into<String>,
        domain: LearningDomain,
        key: impl Into<String>,
        task_type: impl Into<String>,
        outcome: Outcome,
    ) -> Self {
        Self {
            id: EventId::new(),
            actor_id: actor_id.into(),
            domain,
            key: key.into(),
            strategy_id: None,
            task_type: task_type.into(),
            context: TaskContext::new(),
            outcome,
            reward: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, field: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.context.insert(field.into(), value.into());
        self
    }

    pub fn with_strategy(mut self, strategy_id: StrategyId) -> Self {
        self.strategy_id = Some(strategy_id);
        self
    }

    pub fn with_reward(mut self, reward: f64) -> Self {
        self.reward = Some(reward);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Categorical part of the context, used as part of the RL state
    pub fn state_signature(&self) -> String {
        state_signature(&self.context)
    }

    /// Reject malformed events at ingestion
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.actor_id.trim().is_empty() {
            return Err(EngineError::Validation("actor_id cannot be empty".to_string()));
        }
        if self.key.trim().is_empty() {
            return Err(EngineError::Validation("key cannot be empty".to_string()));
        }
        if self.task_type.trim().is_empty() {
            return Err(EngineError::Validation("task_type cannot be empty".to_string()));
        }
        if let Some(reward) = self.reward {
            if !reward.is_finite() {
                return Err(EngineError::Validation(format!("reward must be finite, got {}", reward)));
            }
        }
        for (name, value) in &self.outcome.metrics {
            if !value.is_finite() {
                return Err(EngineError::Validation(format!(
                    "metric '{}' must be finite, got {}",
                    name, value
                )));
            }
        }
        for (field, value) in &self.context {
            if let ContextValue::Number(n) = value {
                if !n.is_finite() {
                    return Err(EngineError::Validation(format!(
                        "context field '{}' must be finite",
                        field
                    )));
                }
            }
        }
        if self.timestamp > Utc::now() + Duration::minutes(5) {
            return Err(EngineError::Validation(format!(
                "timestamp {} lies in the future",
                self.timestamp
            )));
        }
        if !self.outcome.success && self.outcome.error_details.is_none() {
            tracing::debug!(event_id = %self.id.0, "Failed outcome recorded without error details");
        }
        Ok(())
    }
}

/// Canonical form of the categorical context fields. Task identity, numbers
/// and lists are left out so the state space stays bounded by the
/// vocabulary of categories.
pub fn state_signature(context: &TaskContext) -> String {
    let categorical: BTreeMap<&str, String> = context
        .iter()
        .filter(|(field, _)| field.as_str() != TASK_ID_FIELD)
        .filter_map(|(field, value)| value.as_category().map(|c| (field.as_str(), c)))
        .collect();
    // BTreeMap keeps keys ordered, so the JSON form is stable
    serde_json::to_string(&categorical).unwrap_or_default()
}
