// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Insights derived by the pattern analyzer.
//! Ephemeral: consumed by the adaptation engine and folded into a strategy's
//! adaptation history, never persisted on their own.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of condition that triggers a strategy mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    LowSuccessRate,
    TimeoutPattern,
    SelectorFailure,
    ValidationFailure,
    LowWinRate,
    /// A context field value predicts success or failure
    ContextCorrelation,
    /// Parameters seeded from a similar task's successful strategy
    TransferLearning,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::LowSuccessRate => "low_success_rate",
            TriggerKind::TimeoutPattern => "timeout_pattern",
            TriggerKind::SelectorFailure => "selector_failure",
            TriggerKind::ValidationFailure => "validation_failure",
            TriggerKind::LowWinRate => "low_win_rate",
            TriggerKind::ContextCorrelation => "context_correlation",
            TriggerKind::TransferLearning => "transfer_learning",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Human-readable description of the observed pattern
    pub pattern: String,
    pub trigger: TriggerKind,
    /// Direction and strength of the association with success, in [-1, 1]
    pub correlation: f64,
    pub recommendation: String,
    /// Expected effect size of acting on this insight, in [0, 1]
    pub impact_estimate: f64,
    pub evidence: Vec<String>,
    /// Selector key or context field the insight is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl Insight {
    pub fn new(trigger: TriggerKind, pattern: impl Into<String>, recommendation: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            trigger,
            correlation: 0.0,
            recommendation: recommendation.into(),
            impact_estimate: 0.0,
            evidence: Vec::new(),
            subject: None,
        }
    }

    pub fn with_correlation(mut self, correlation: f64) -> Self {
        self.correlation = correlation.clamp(-1.0, 1.0);
        self
    }

    pub fn with_impact(mut self, impact: f64) -> Self {
        self.impact_estimate = impact.clamp(0.0, 1.0);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }

    /// Ranking key: |correlation| * impact_estimate
    pub fn rank_score(&self) -> f64 {
        self.correlation.abs() * self.impact_estimate
    }
}
