// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! A/B test aggregate comparing two strategy variants of the same key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::LearningDomain;
use crate::domain::strategy::{Strategy, StrategyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbTestId(pub Uuid);

impl AbTestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AbTestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AbTestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbVariant {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbTestStatus {
    Active,
    Concluded,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbMetrics {
    pub success_rate_a: f64,
    pub success_rate_b: f64,
    pub sample_size_a: u64,
    pub sample_size_b: u64,
}

impl AbMetrics {
    pub fn from_strategies(a: &Strategy, b: &Strategy) -> Self {
        Self {
            success_rate_a: a.performance.success_rate,
            success_rate_b: b.performance.success_rate,
            sample_size_a: a.performance.sample_size,
            sample_size_b: b.performance.sample_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTest {
    pub id: AbTestId,
    pub domain: LearningDomain,
    pub key: String,
    pub strategy_a_id: StrategyId,
    pub strategy_b_id: StrategyId,
    pub metrics: AbMetrics,
    pub winner: Option<AbVariant>,
    /// 1 - p of the last analysis
    pub statistical_significance: f64,
    pub status: AbTestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concluded_at: Option<DateTime<Utc>>,
}

impl AbTest {
    pub fn new(a: &Strategy, b: &Strategy) -> Self {
        Self {
            id: AbTestId::new(),
            domain: a.domain,
            key: a.key.clone(),
            strategy_a_id: a.id,
            strategy_b_id: b.id,
            metrics: AbMetrics::from_strategies(a, b),
            winner: None,
            statistical_significance: 0.0,
            status: AbTestStatus::Active,
            created_at: Utc::now(),
            concluded_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AbTestStatus::Active
    }

    pub fn conclude(&mut self, winner: AbVariant, significance: f64) {
        self.winner = Some(winner);
        self.statistical_significance = significance;
        self.status = AbTestStatus::Concluded;
        self.concluded_at = Some(Utc::now());
    }

    pub fn winner_id(&self) -> Option<StrategyId> {
        self.winner.map(|w| match w {
            AbVariant::A => self.strategy_a_id,
            AbVariant::B => self.strategy_b_id,
        })
    }
}

/// Result of analyzing an A/B test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestAnalysis {
    pub test_id: AbTestId,
    pub winner: Option<AbVariant>,
    pub confidence: f64,
    pub p_value: f64,
    pub recommendation: String,
}
