// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Predictive Scorer
//!
//! Heuristic estimators for proposal work: win probability, price
//! optimization and deadline risk. Every estimate carries a confidence and
//! the additive factors that produced it. Price and deadline estimates are
//! pure; win probability reads proposal outcomes from the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::domain::error::EngineError;
use crate::domain::event::LearningDomain;
use crate::domain::prediction::{
    DeadlineRequest, DeadlineRisk, Factor, Prediction, PriceRecommendation, PriceRequest, RiskLevel, TaskEstimate,
    WinProbabilityRequest,
};
use crate::domain::repository::{EventQuery, OutcomeStore};

const MIN_HISTORY: usize = 5;
const HISTORY_LIMIT: usize = 1_000;

pub struct PredictiveScorer {
    store: Arc<dyn OutcomeStore>,
}

impl PredictiveScorer {
    pub fn new(store: Arc<dyn OutcomeStore>) -> Self {
        Self { store }
    }

    /// Win probability from historical proposal outcomes, narrowed to
    /// `request.key` when one is given
    pub async fn win_probability(&self, request: &WinProbabilityRequest) -> Result<Prediction, EngineError> {
        let mut query = EventQuery::for_domain(LearningDomain::ProposalGeneration).limit(HISTORY_LIMIT);
        if let Some(key) = &request.key {
            query = query.key(key);
        }
        let history = self.store.query(&query).await?;
        let wins = history.iter().filter(|e| e.outcome.success).count();
        debug!(key = ?request.key, history = history.len(), wins, "Estimating win probability");
        estimate_win_probability(wins, history.len(), request)
    }

    pub fn optimize_price(&self, request: &PriceRequest) -> Result<PriceRecommendation, EngineError> {
        optimize_price(request)
    }

    pub fn deadline_risk(&self, request: &DeadlineRequest) -> Result<DeadlineRisk, EngineError> {
        assess_deadline_risk(request)
    }
}

pub fn estimate_win_probability(
    wins: usize,
    count: usize,
    request: &WinProbabilityRequest,
) -> Result<Prediction, EngineError> {
    if !(0.0..=1.0).contains(&request.complexity) {
        return Err(EngineError::Validation(format!(
            "complexity must be within [0, 1], got {}",
            request.complexity
        )));
    }
    if count < MIN_HISTORY {
        return Ok(Prediction {
            value: 0.5,
            confidence: 0.3,
            contributing_factors: vec![Factor::new("insufficient_history", 0.0)],
        });
    }

    let base = wins as f64 / count as f64;
    let mut factors = vec![Factor::new("base_rate", base)];
    let mut probability = base;

    if let (Some(bid), Some(market)) = (request.bid_value, request.market_value) {
        if bid > 0.0 && market > 0.0 {
            let ratio = bid / market;
            let adjustment = if ratio < 0.9 {
                0.1
            } else if ratio > 1.1 {
                -0.1
            } else {
                0.0
            };
            if adjustment != 0.0 {
                factors.push(Factor::new("value_competitiveness", adjustment));
                probability += adjustment;
            }
        }
    }

    let complexity_adjustment = -(request.complexity - 0.5) * 0.2;
    if complexity_adjustment != 0.0 {
        factors.push(Factor::new("complexity", complexity_adjustment));
        probability += complexity_adjustment;
    }

    if let Some(historical) = request.historical_win_rate {
        let adjustment = (historical.clamp(0.0, 1.0) - base) * 0.3;
        factors.push(Factor::new("historical_win_rate", adjustment));
        probability += adjustment;
    }

    Ok(Prediction {
        value: probability.clamp(0.05, 0.95),
        confidence: (0.5 + count as f64 / 100.0 * 0.45).min(0.95),
        contributing_factors: factors,
    })
}

pub fn optimize_price(request: &PriceRequest) -> Result<PriceRecommendation, EngineError> {
    if !(request.cost.is_finite() && request.cost > 0.0) {
        return Err(EngineError::Validation(format!("cost must be positive, got {}", request.cost)));
    }
    if !(request.min_margin >= 0.0 && request.desired_margin >= request.min_margin) {
        return Err(EngineError::Validation(format!(
            "margins must satisfy 0 <= min ({}) <= desired ({})",
            request.min_margin, request.desired_margin
        )));
    }

    let floor = request.cost * (1.0 + request.min_margin);
    let mut optimal = request.cost * (1.0 + request.desired_margin);
    let mut factors = vec![Factor::new("desired_margin", request.desired_margin)];

    let competitors: Vec<f64> = request
        .competitor_prices
        .iter()
        .copied()
        .filter(|p| p.is_finite() && *p > 0.0)
        .collect();
    let competitor_median = median(&competitors);

    if let Some(median) = competitor_median {
        if (optimal - median).abs() / median > 0.2 {
            let adjusted = optimal.clamp(median * 0.8, median * 1.2);
            factors.push(Factor::new("competitor_adjustment", (adjusted - optimal) / optimal));
            optimal = adjusted;
        }
    }
    if optimal < floor {
        factors.push(Factor::new("minimum_margin_floor", (floor - optimal) / optimal));
        optimal = floor;
    }

    let confidence = if competitors.is_empty() {
        0.4
    } else {
        (0.5 + 0.1 * competitors.len() as f64).min(0.9)
    };

    Ok(PriceRecommendation {
        prediction: Prediction {
            value: optimal,
            confidence,
            contributing_factors: factors,
        },
        min_price: floor,
        max_price: optimal.max(competitor_median.unwrap_or(optimal)),
        competitor_median,
    })
}

pub fn assess_deadline_risk(request: &DeadlineRequest) -> Result<DeadlineRisk, EngineError> {
    for task in &request.tasks {
        if !(task.estimated_days.is_finite() && task.estimated_days >= 0.0) {
            return Err(EngineError::Validation(format!(
                "task '{}' has an invalid estimate: {}",
                task.name, task.estimated_days
            )));
        }
    }
    if !request.days_until_deadline.is_finite() {
        return Err(EngineError::Validation("days_until_deadline must be finite".to_string()));
    }

    let total: f64 = request.tasks.iter().map(|t| t.estimated_days).sum();
    let average_complexity = if request.tasks.is_empty() {
        0.0
    } else {
        request.tasks.iter().map(|t| t.complexity.clamp(0.0, 1.0)).sum::<f64>() / request.tasks.len() as f64
    };
    let complexity_buffer = total * (0.2 + 0.3 * average_complexity);
    let depth = max_dependency_depth(&request.tasks);
    let dependency_buffer = total * 0.1 * depth as f64;
    let required = total + complexity_buffer + dependency_buffer;

    let factors = vec![
        Factor::new("estimated_days", total),
        Factor::new("complexity_buffer", complexity_buffer),
        Factor::new("dependency_buffer", dependency_buffer),
    ];
    let confidence = 0.6 + 0.3 * (1.0 - average_complexity);

    if request.days_until_deadline <= 0.0 {
        return Ok(DeadlineRisk {
            prediction: Prediction {
                value: 1.0,
                confidence,
                contributing_factors: factors,
            },
            risk_level: RiskLevel::Critical,
            required_days: required,
            time_ratio: f64::INFINITY,
        });
    }

    let time_ratio = required / request.days_until_deadline;
    let (probability, risk_level) = if time_ratio < 0.7 {
        (0.1, RiskLevel::Low)
    } else if time_ratio < 0.85 {
        (0.3, RiskLevel::Medium)
    } else if time_ratio < 1.0 {
        (0.5, RiskLevel::Medium)
    } else if time_ratio < 1.2 {
        (0.75, RiskLevel::High)
    } else {
        (0.95, RiskLevel::Critical)
    };

    Ok(DeadlineRisk {
        prediction: Prediction {
            value: probability,
            confidence,
            contributing_factors: factors,
        },
        risk_level,
        required_days: required,
        time_ratio,
    })
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Longest dependency chain, counted in edges. Unknown dependencies are
/// ignored; cycles are cut at the first revisited task.
fn max_dependency_depth(tasks: &[TaskEstimate]) -> usize {
    let by_name: HashMap<&str, &TaskEstimate> = tasks.iter().map(|t| (t.name.as_str(), t)).collect();
    let mut memo: HashMap<&str, usize> = HashMap::new();

    fn depth<'a>(
        name: &'a str,
        by_name: &HashMap<&'a str, &'a TaskEstimate>,
        memo: &mut HashMap<&'a str, usize>,
        visiting: &mut HashSet<&'a str>,
    ) -> usize {
        if let Some(d) = memo.get(name) {
            return *d;
        }
        let Some(&task) = by_name.get(name) else {
            return 0;
        };
        if !visiting.insert(name) {
            return 0;
        }
        let mut best = 0;
        for dependency in &task.dependencies {
            if by_name.contains_key(dependency.as_str()) {
                best = best.max(1 + depth(dependency.as_str(), by_name, memo, visiting));
            }
        }
        visiting.remove(name);
        memo.insert(name, best);
        best
    }

    let mut visiting = HashSet::new();
    tasks
        .iter()
        .map(|t| depth(t.name.as_str(), &by_name, &mut memo, &mut visiting))
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, days: f64, deps: &[&str]) -> TaskEstimate {
        TaskEstimate {
            name: name.to_string(),
            estimated_days: days,
            complexity: 0.5,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_tight_deadline_is_high_risk() {
        let risk = assess_deadline_risk(&DeadlineRequest::aggregate(10.0, 8.0, 0.5)).unwrap();
        assert!(risk.risk_level >= RiskLevel::High);
        assert!(risk.prediction.value > 0.5);
        assert!((risk.required_days - 13.5).abs() < 1e-9);
    }

    #[test]
    fn test_generous_deadline_is_low_risk() {
        let risk = assess_deadline_risk(&DeadlineRequest::aggregate(10.0, 40.0, 0.5)).unwrap();
        assert_eq!(risk.risk_level, RiskLevel::Low);
        assert_eq!(risk.prediction.value, 0.1);
    }

    #[test]
    fn test_past_deadline_is_critical() {
        let risk = assess_deadline_risk(&DeadlineRequest::aggregate(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(risk.risk_level, RiskLevel::Critical);
        assert_eq!(risk.prediction.value, 1.0);
    }

    #[test]
    fn test_dependency_depth_handles_cycles() {
        let chain = vec![task("a", 1.0, &[]), task("b", 1.0, &["a"]), task("c", 1.0, &["b"])];
        assert_eq!(max_dependency_depth(&chain), 2);

        let cycle = vec![task("a", 1.0, &["b"]), task("b", 1.0, &["a"])];
        assert!(max_dependency_depth(&cycle) <= 2);

        let unknown = vec![task("a", 1.0, &["missing"])];
        assert_eq!(max_dependency_depth(&unknown), 0);
    }

    #[test]
    fn test_price_clamped_toward_competitors() {
        let rec = optimize_price(&PriceRequest {
            cost: 100.0,
            desired_margin: 0.5,
            min_margin: 0.05,
            competitor_prices: vec![100.0, 110.0, 120.0],
        })
        .unwrap();
        assert_eq!(rec.competitor_median, Some(110.0));
        assert!((rec.prediction.value - 132.0).abs() < 1e-9);
        assert!((rec.min_price - 105.0).abs() < 1e-9);
        assert!((rec.max_price - 132.0).abs() < 1e-9);
    }

    #[test]
    fn test_price_respects_margin_floor() {
        let rec = optimize_price(&PriceRequest {
            cost: 100.0,
            desired_margin: 0.15,
            min_margin: 0.1,
            competitor_prices: vec![50.0],
        })
        .unwrap();
        assert!((rec.prediction.value - 110.0).abs() < 1e-9);
        assert!((rec.max_price - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_price_rejects_bad_input() {
        let err = optimize_price(&PriceRequest {
            cost: -1.0,
            desired_margin: 0.1,
            min_margin: 0.05,
            competitor_prices: vec![],
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_win_probability_without_history() {
        let p = estimate_win_probability(1, 3, &WinProbabilityRequest::default()).unwrap();
        assert_eq!(p.value, 0.5);
        assert_eq!(p.confidence, 0.3);
    }

    #[test]
    fn test_win_probability_adjustments() {
        let request = WinProbabilityRequest {
            bid_value: Some(80.0),
            market_value: Some(100.0),
            complexity: 0.5,
            ..Default::default()
        };
        let p = estimate_win_probability(5, 10, &request).unwrap();
        assert!((p.value - 0.6).abs() < 1e-9);
        assert!((p.confidence - (0.5 + 0.045)).abs() < 1e-9);

        let hard = WinProbabilityRequest {
            complexity: 1.0,
            historical_win_rate: Some(0.0),
            ..Default::default()
        };
        let p = estimate_win_probability(1, 100, &hard).unwrap();
        assert_eq!(p.value, 0.05);
        assert!((p.confidence - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_win_probability_uses_only_the_requested_key() {
        use crate::domain::event::{ErrorDetails, ErrorKind, LearningEvent, Outcome};
        use crate::infrastructure::memory_store::InMemoryOutcomeStore;

        let store = Arc::new(InMemoryOutcomeStore::new());
        for i in 0..10 {
            let won = LearningEvent::new(
                "bd",
                LearningDomain::ProposalGeneration,
                "agency-a",
                "bid",
                Outcome::success(),
            );
            store.append(&won).await.unwrap();
            let outcome = if i < 2 {
                Outcome::success()
            } else {
                Outcome::failure(ErrorDetails::new(ErrorKind::Other, "lost"))
            };
            let other = LearningEvent::new("bd", LearningDomain::ProposalGeneration, "agency-b", "bid", outcome);
            store.append(&other).await.unwrap();
        }
        let scorer = PredictiveScorer::new(store);
        let base_rate = |p: &Prediction| {
            p.contributing_factors
                .iter()
                .find(|f| f.name == "base_rate")
                .map(|f| f.impact)
        };

        let all = scorer.win_probability(&WinProbabilityRequest::default()).await.unwrap();
        assert_eq!(base_rate(&all), Some(0.6));

        let request = |key: &str| WinProbabilityRequest {
            key: Some(key.to_string()),
            ..Default::default()
        };
        let a = scorer.win_probability(&request("agency-a")).await.unwrap();
        assert_eq!(base_rate(&a), Some(1.0));
        let b = scorer.win_probability(&request("agency-b")).await.unwrap();
        assert_eq!(base_rate(&b), Some(0.2));
    }
}
