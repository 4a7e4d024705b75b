// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Inputs and outputs of the predictive scorer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One additive contribution to an estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub name: String,
    pub impact: f64,
}

impl Factor {
    pub fn new(name: impl Into<String>, impact: f64) -> Self {
        Self {
            name: name.into(),
            impact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub value: f64,
    pub confidence: f64,
    pub contributing_factors: Vec<Factor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WinProbabilityRequest {
    /// Issuer or agency key; when set only that key's history counts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_value: Option<f64>,
    /// Typical award value for comparable contracts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_value: Option<f64>,
    /// Normalized complexity in [0, 1]
    pub complexity: f64,
    /// Known win rate against this issuer, when tracked elsewhere
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_win_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRequest {
    pub cost: f64,
    pub desired_margin: f64,
    pub min_margin: f64,
    #[serde(default)]
    pub competitor_prices: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecommendation {
    /// `value` is the recommended price
    pub prediction: Prediction,
    pub min_price: f64,
    pub max_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competitor_median: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEstimate {
    pub name: String,
    pub estimated_days: f64,
    /// Normalized complexity in [0, 1]
    pub complexity: f64,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineRequest {
    pub tasks: Vec<TaskEstimate>,
    pub days_until_deadline: f64,
}

impl DeadlineRequest {
    /// Single aggregate task with no dependencies
    pub fn aggregate(total_estimated_days: f64, days_until_deadline: f64, complexity: f64) -> Self {
        Self {
            tasks: vec![TaskEstimate {
                name: "total".to_string(),
                estimated_days: total_estimated_days,
                complexity,
                dependencies: Vec::new(),
            }],
            days_until_deadline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineRisk {
    /// `value` is the probability of delay
    pub prediction: Prediction,
    pub risk_level: RiskLevel,
    pub required_days: f64,
    pub time_ratio: f64,
}
