// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Improvement recommendations for an actor, assembled from analyzer
//! insights over its recent events, from consolidated knowledge of events
//! already pruned, and from the health of its strategies.

use serde::Serialize;

use crate::domain::event::LearningDomain;
use crate::domain::insight::{Insight, TriggerKind};
use crate::domain::knowledge::{ConsolidatedKnowledge, FactorSummary};
use crate::domain::strategy::{Strategy, StrategyId, ValidationStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub domain: LearningDomain,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<StrategyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerKind>,
    pub message: String,
    pub rationale: Vec<String>,
    /// Higher is more urgent, in [0, 1]
    pub priority: f64,
}

pub fn from_insights(
    domain: LearningDomain,
    key: &str,
    strategy_id: Option<StrategyId>,
    insights: &[Insight],
) -> Vec<Recommendation> {
    insights
        .iter()
        .map(|insight| {
            let mut rationale = vec![insight.pattern.clone()];
            rationale.extend(insight.evidence.iter().cloned());
            Recommendation {
                domain,
                key: key.to_string(),
                strategy_id,
                trigger: Some(insight.trigger),
                message: insight.recommendation.clone(),
                rationale,
                priority: insight.rank_score(),
            }
        })
        .collect()
}

/// Finding from the strongest context factor of a consolidated period.
/// `None` when the period produced no factors.
pub fn from_knowledge(knowledge: &ConsolidatedKnowledge, strategy_id: Option<StrategyId>) -> Option<Recommendation> {
    let headline = knowledge.headline_factor()?;
    let message = if headline.lift < 0.0 {
        format!(
            "Adapt the strategy for {} = {}; it underperforms historically",
            headline.field, headline.value
        )
    } else {
        format!(
            "Prefer tasks with {} = {}; they historically succeed more often",
            headline.field, headline.value
        )
    };

    let mut rationale = vec![format!(
        "{} consolidated outcomes from {} to {} at {:.0}% success",
        knowledge.event_count,
        knowledge.period_start.format("%Y-%m-%d"),
        knowledge.period_end.format("%Y-%m-%d"),
        knowledge.success_rate * 100.0
    )];
    rationale.extend(
        knowledge
            .success_factors
            .iter()
            .chain(knowledge.failure_factors.iter())
            .map(describe_factor),
    );

    Some(Recommendation {
        domain: knowledge.domain,
        key: knowledge.key.clone(),
        strategy_id,
        trigger: None,
        message,
        rationale,
        priority: (headline.lift.abs() * 0.5).clamp(0.0, 1.0),
    })
}

fn describe_factor(factor: &FactorSummary) -> String {
    format!(
        "{} = {}: {:.0}% success over {} outcomes ({:+.2} vs baseline)",
        factor.field,
        factor.value,
        factor.success_rate * 100.0,
        factor.occurrences,
        factor.lift
    )
}

/// Strategy-level findings: unvalidated after use, or low confidence
pub fn from_strategy_health(strategy: &Strategy, confidence_threshold: f64) -> Vec<Recommendation> {
    let mut found = Vec::new();
    let base = |message: String, rationale: String, priority: f64| Recommendation {
        domain: strategy.domain,
        key: strategy.key.clone(),
        strategy_id: Some(strategy.id),
        trigger: None,
        message,
        rationale: vec![rationale],
        priority,
    };

    if strategy.validation_status == ValidationStatus::NeedsValidation && strategy.performance.sample_size > 0 {
        found.push(base(
            "Validate the strategy with a supervised run".to_string(),
            format!(
                "No success since the last refresh ({} outcomes recorded)",
                strategy.performance.sample_size
            ),
            0.3,
        ));
    }
    if strategy.confidence_score < confidence_threshold {
        found.push(base(
            "Register a strategy variant and A/B test it against the current one".to_string(),
            format!(
                "Confidence {:.2} is below {:.2}",
                strategy.confidence_score, confidence_threshold
            ),
            (confidence_threshold - strategy.confidence_score).clamp(0.0, 1.0),
        ));
    }
    found
}

/// Most urgent first; ties ordered by key
pub fn rank(mut recommendations: Vec<Recommendation>) -> Vec<Recommendation> {
    recommendations.sort_by(|a, b| {
        b.priority
            .total_cmp(&a.priority)
            .then_with(|| a.key.cmp(&b.key))
            .then_with(|| a.message.cmp(&b.message))
    });
    recommendations
}
