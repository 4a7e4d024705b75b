// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain events for the learning engine
//! Published to the EventBus for observability and integration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ab_test::{AbTestId, AbVariant};
use crate::domain::event::{EventId, LearningDomain};
use crate::domain::insight::TriggerKind;
use crate::domain::strategy::StrategyId;

/// How a strategy was chosen by `select_strategy`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Explore,
    Exploit,
    /// Timeout or persistence failure; served from cache or defaults
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A learning event was appended and folded into its strategy
    OutcomeRecorded {
        event_id: EventId,
        domain: LearningDomain,
        key: String,
        strategy_id: StrategyId,
        success: bool,
        reward: f64,
        q_value: f64,
        timestamp: DateTime<Utc>,
    },

    /// The adaptation engine mutated a strategy
    StrategyAdapted {
        strategy_id: StrategyId,
        domain: LearningDomain,
        key: String,
        trigger: TriggerKind,
        version: u64,
        changes: usize,
        timestamp: DateTime<Utc>,
    },

    StrategySelected {
        strategy_id: StrategyId,
        domain: LearningDomain,
        key: String,
        mode: SelectionMode,
        timestamp: DateTime<Utc>,
    },

    /// Soft-deleted by the consolidation scheduler
    StrategyArchived {
        strategy_id: StrategyId,
        domain: LearningDomain,
        key: String,
        confidence_score: f64,
        sample_size: u64,
        timestamp: DateTime<Utc>,
    },

    AbTestConcluded {
        test_id: AbTestId,
        winner: AbVariant,
        winner_strategy_id: StrategyId,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    ConsolidationCompleted {
        knowledge_created: usize,
        events_pruned: u64,
        strategies_archived: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EngineEvent::OutcomeRecorded { timestamp, .. }
            | EngineEvent::StrategyAdapted { timestamp, .. }
            | EngineEvent::StrategySelected { timestamp, .. }
            | EngineEvent::StrategyArchived { timestamp, .. }
            | EngineEvent::AbTestConcluded { timestamp, .. }
            | EngineEvent::ConsolidationCompleted { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::OutcomeRecorded { .. } => "outcome_recorded",
            EngineEvent::StrategyAdapted { .. } => "strategy_adapted",
            EngineEvent::StrategySelected { .. } => "strategy_selected",
            EngineEvent::StrategyArchived { .. } => "strategy_archived",
            EngineEvent::AbTestConcluded { .. } => "ab_test_concluded",
            EngineEvent::ConsolidationCompleted { .. } => "consolidation_completed",
        }
    }
}
