// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Durable knowledge distilled from raw learning events before they are pruned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::LearningDomain;

/// Success-rate lift of one categorical context value over the key's baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSummary {
    pub field: String,
    pub value: String,
    pub success_rate: f64,
    /// success_rate - baseline
    pub lift: f64,
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedKnowledge {
    pub id: Uuid,
    pub domain: LearningDomain,
    pub key: String,
    pub event_count: usize,
    pub success_rate: f64,
    pub success_factors: Vec<FactorSummary>,
    pub failure_factors: Vec<FactorSummary>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ConsolidatedKnowledge {
    /// Strongest factor in either direction, if any
    pub fn headline_factor(&self) -> Option<&FactorSummary> {
        self.success_factors
            .iter()
            .chain(self.failure_factors.iter())
            .max_by(|a, b| a.lift.abs().total_cmp(&b.lift.abs()))
    }
}
