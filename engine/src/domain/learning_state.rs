// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Reinforcement-learning state and the temporal-difference update applied to
//! the persisted Q-table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::event::{state_signature, LearningDomain, LearningEvent, TaskContext};
use crate::domain::strategy::StrategyId;

/// Learning state: domain, task type and the categorical context
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub domain: LearningDomain,
    pub task_type: String,
    pub context: String,
}

impl StateKey {
    pub fn new(domain: LearningDomain, task_type: impl Into<String>, context: &TaskContext) -> Self {
        Self {
            domain,
            task_type: task_type.into(),
            context: state_signature(context),
        }
    }

    pub fn from_event(event: &LearningEvent) -> Self {
        Self::new(event.domain, event.task_type.clone(), &event.context)
    }

    /// Single-column form used by persistent stores
    pub fn encode(&self) -> String {
        format!("{}|{}|{}", self.domain, self.task_type, self.context)
    }
}

/// `Q' = Q + α(reward + γ·max_next_q − Q)`
pub fn q_update(q: f64, reward: f64, max_next_q: f64, learning_rate: f64, discount_factor: f64) -> f64 {
    q + learning_rate * (reward + discount_factor * max_next_q - q)
}

/// One update of a state-action entry.
///
/// A task never changes its own context, so the next-state estimate is the
/// best value currently stored for the same state.
#[derive(Debug, Clone, PartialEq)]
pub struct QUpdate {
    pub state: StateKey,
    pub strategy_id: StrategyId,
    /// Starting value of an entry that was never updated
    pub initial: f64,
    pub reward: f64,
    pub learning_rate: f64,
    pub discount_factor: f64,
}

impl QUpdate {
    /// New value of the entry given the state's current row
    pub fn apply(&self, row: &HashMap<StrategyId, f64>) -> f64 {
        let max_next_q = max_value(row);
        let q = row.get(&self.strategy_id).copied().unwrap_or(self.initial);
        q_update(q, self.reward, max_next_q, self.learning_rate, self.discount_factor)
    }
}

/// Best value in a row; 0.0 for an unseen state
pub fn max_value(row: &HashMap<StrategyId, f64>) -> f64 {
    row.values().copied().reduce(f64::max).unwrap_or(0.0)
}
