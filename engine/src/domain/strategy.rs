// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Strategy Aggregate
//!
//! A [`Strategy`] is the versioned configuration governing how a task is
//! executed for one `(domain, key)` pair. Several variants may exist for the
//! same key; they compete through epsilon-greedy selection and A/B tests.
//!
//! ## Invariants
//!
//! - `performance.success_rate == performance.wins / performance.sample_size`
//!   after every recorded outcome (0.0 when no samples exist).
//! - Performance counters are only reset by [`Strategy::replace_parameters`].
//! - `version` is owned by the strategy repository; it increases by exactly one
//!   per successful merge.
//!
//! ## Parameters
//!
//! Parameters are a tagged union per domain rather than a free-form JSON blob,
//! so the adaptation engine can only mutate fields that exist.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::event::LearningDomain;
use crate::domain::insight::TriggerKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrategyId(pub Uuid);

impl StrategyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StrategyId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StrategyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Selector with its ordered fallbacks and a reliability score in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorCandidates {
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
    pub score: f64,
    #[serde(default)]
    pub needs_replacement: bool,
}

impl SelectorCandidates {
    pub fn new(primary: impl Into<String>, fallbacks: &[&str]) -> Self {
        Self {
            primary: primary.into(),
            fallbacks: fallbacks.iter().map(|f| f.to_string()).collect(),
            score: 1.0,
            needs_replacement: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationParams {
    pub base_wait_ms: u64,
    pub max_wait_ms: u64,
    pub page_load_wait_ms: u64,
    pub timing_multiplier: f64,
    pub retry_limit: u32,
    #[serde(default)]
    pub selectors: BTreeMap<String, SelectorCandidates>,
}

impl Default for NavigationParams {
    fn default() -> Self {
        let mut selectors = BTreeMap::new();
        selectors.insert(
            "search_box".to_string(),
            SelectorCandidates::new("input[type=search]", &["#search", "input[name=q]"]),
        );
        selectors.insert(
            "results_table".to_string(),
            SelectorCandidates::new("table.results", &["div.results", "ul.opportunities"]),
        );
        selectors.insert(
            "next_page".to_string(),
            SelectorCandidates::new("a.next", &["button[aria-label=Next]", "li.pagination-next a"]),
        );
        Self {
            base_wait_ms: 2_000,
            max_wait_ms: 5_000,
            page_load_wait_ms: 3_000,
            timing_multiplier: 1.0,
            retry_limit: 3,
            selectors,
        }
    }
}

impl NavigationParams {
    /// Wait applied between actions once the timing multiplier is factored in
    pub fn effective_wait_ms(&self) -> u64 {
        ((self.base_wait_ms as f64) * self.timing_multiplier).round() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    Structured,
    Hybrid,
    FreeText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSeverity {
    Lenient,
    Standard,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsingParams {
    pub confidence_threshold: f64,
    pub extraction_mode: ExtractionMode,
    pub validation_severity: ValidationSeverity,
    pub timeout_ms: u64,
    pub retry_limit: u32,
}

impl Default for ParsingParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            extraction_mode: ExtractionMode::Hybrid,
            validation_severity: ValidationSeverity::Standard,
            timeout_ms: 30_000,
            retry_limit: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeTone {
    Balanced,
    Assertive,
    Conservative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalParams {
    /// Pricing margin as a fraction (0.15 = 15 %)
    pub pricing_margin: f64,
    pub min_margin: f64,
    pub narrative_tone: NarrativeTone,
    pub compliance_strictness: ValidationSeverity,
    /// Set when the margin is flagged as an underperforming price candidate
    #[serde(default)]
    pub margin_under_review: bool,
}

impl Default for ProposalParams {
    fn default() -> Self {
        Self {
            pricing_margin: 0.15,
            min_margin: 0.05,
            narrative_tone: NarrativeTone::Balanced,
            compliance_strictness: ValidationSeverity::Strict,
            margin_under_review: false,
        }
    }
}

/// Domain-specific strategy parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyParameters {
    Navigation(NavigationParams),
    Parsing(ParsingParams),
    Proposal(ProposalParams),
}

impl StrategyParameters {
    pub fn defaults_for(domain: LearningDomain) -> Self {
        match domain {
            LearningDomain::PortalNavigation => StrategyParameters::Navigation(NavigationParams::default()),
            LearningDomain::DocumentParsing => StrategyParameters::Parsing(ParsingParams::default()),
            LearningDomain::ProposalGeneration => StrategyParameters::Proposal(ProposalParams::default()),
        }
    }

    pub fn domain(&self) -> LearningDomain {
        match self {
            StrategyParameters::Navigation(_) => LearningDomain::PortalNavigation,
            StrategyParameters::Parsing(_) => LearningDomain::DocumentParsing,
            StrategyParameters::Proposal(_) => LearningDomain::ProposalGeneration,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub success_rate: f64,
    pub sample_size: u64,
    pub wins: u64,
    pub average_latency_ms: f64,
    #[serde(default)]
    pub latency_samples: u64,
    pub error_count: u64,
}

impl Performance {
    pub fn record(&mut self, success: bool, latency_ms: Option<f64>) {
        self.sample_size += 1;
        if success {
            self.wins += 1;
        } else {
            self.error_count += 1;
        }
        self.success_rate = self.wins as f64 / self.sample_size as f64;

        if let Some(latency) = latency_ms.filter(|l| l.is_finite() && *l >= 0.0) {
            self.latency_samples += 1;
            self.average_latency_ms +=
                (latency - self.average_latency_ms) / self.latency_samples as f64;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    NeedsValidation,
    Validated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterChange {
    pub parameter: String,
    pub old_value: Value,
    pub new_value: Value,
}

impl ParameterChange {
    pub fn new(parameter: impl Into<String>, old_value: impl Into<Value>, new_value: impl Into<Value>) -> Self {
        Self {
            parameter: parameter.into(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }
}

/// One entry of a strategy's adaptation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationRecord {
    pub timestamp: DateTime<Utc>,
    pub trigger: TriggerKind,
    pub changes: Vec<ParameterChange>,
    /// Success-rate delta observed after the adaptation; `None` until enough
    /// post-adaptation samples accrue
    pub impact_score: Option<f64>,
    pub baseline_success_rate: f64,
    pub baseline_sample_size: u64,
    pub baseline_wins: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Versioned, mutable configuration for one `(domain, key)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: StrategyId,
    pub domain: LearningDomain,
    pub key: String,
    pub version: u64,
    pub parameters: StrategyParameters,
    pub performance: Performance,
    pub q_value: f64,
    pub exploration_count: u64,
    pub exploitation_count: u64,
    pub confidence_score: f64,
    pub validation_status: ValidationStatus,
    #[serde(default)]
    pub adaptation_history: Vec<AdaptationRecord>,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    pub fn new(domain: LearningDomain, key: impl Into<String>, parameters: StrategyParameters) -> Self {
        let now = Utc::now();
        Self {
            id: StrategyId::new(),
            domain,
            key: key.into(),
            version: 0,
            parameters,
            performance: Performance::default(),
            q_value: 0.0,
            exploration_count: 0,
            exploitation_count: 0,
            confidence_score: 0.5,
            validation_status: ValidationStatus::NeedsValidation,
            adaptation_history: Vec::new(),
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Strategy with the domain's default parameters
    pub fn default_for(domain: LearningDomain, key: impl Into<String>) -> Self {
        Self::new(domain, key, StrategyParameters::defaults_for(domain))
    }

    /// Exploitation score: q_value * success_rate
    pub fn selection_score(&self) -> f64 {
        self.q_value * self.performance.success_rate
    }

    /// Fold one outcome into the performance counters and confidence score
    pub fn record_outcome(&mut self, success: bool, latency_ms: Option<f64>, success_step: f64, failure_step: f64) {
        self.performance.record(success, latency_ms);
        let delta = if success { success_step } else { -failure_step };
        self.confidence_score = (self.confidence_score + delta).clamp(0.0, 1.0);
        if success && self.validation_status == ValidationStatus::NeedsValidation {
            self.validation_status = ValidationStatus::Validated;
        }
    }

    pub fn push_adaptation(&mut self, trigger: TriggerKind, changes: Vec<ParameterChange>, note: Option<String>) {
        self.adaptation_history.push(AdaptationRecord {
            timestamp: Utc::now(),
            trigger,
            changes,
            impact_score: None,
            baseline_success_rate: self.performance.success_rate,
            baseline_sample_size: self.performance.sample_size,
            baseline_wins: self.performance.wins,
            note,
        });
    }

    pub fn last_adaptation(&self, trigger: TriggerKind) -> Option<&AdaptationRecord> {
        self.adaptation_history.iter().rev().find(|r| r.trigger == trigger)
    }

    /// Whether `trigger` fired within the last `cooldown_samples` outcomes
    pub fn adapted_recently(&self, trigger: TriggerKind, cooldown_samples: u64) -> bool {
        self.last_adaptation(trigger)
            .map(|r| self.performance.sample_size.saturating_sub(r.baseline_sample_size) < cooldown_samples)
            .unwrap_or(false)
    }

    /// Back-fill `impact_score` on history entries that have accrued
    /// `min_samples` outcomes since they were applied. Returns the resolved
    /// impacts in history order.
    pub fn resolve_pending_impacts(&mut self, min_samples: u64) -> Vec<(TriggerKind, f64)> {
        let sample_size = self.performance.sample_size;
        let wins = self.performance.wins;
        let mut resolved = Vec::new();

        for record in self.adaptation_history.iter_mut().filter(|r| r.impact_score.is_none()) {
            let post_samples = sample_size.saturating_sub(record.baseline_sample_size);
            if post_samples < min_samples || post_samples == 0 {
                continue;
            }
            let post_wins = wins.saturating_sub(record.baseline_wins);
            let post_rate = post_wins as f64 / post_samples as f64;
            let impact = (post_rate - record.baseline_success_rate).clamp(-1.0, 1.0);
            record.impact_score = Some(impact);
            resolved.push((record.trigger, impact));
        }

        for (_, impact) in &resolved {
            self.confidence_score = (self.confidence_score + 0.1 * impact).clamp(0.0, 1.0);
        }
        resolved
    }

    /// Keep only the most recent `max_entries` history entries
    pub fn trim_history(&mut self, max_entries: usize) {
        if self.adaptation_history.len() > max_entries {
            let excess = self.adaptation_history.len() - max_entries;
            self.adaptation_history.drain(..excess);
        }
    }

    /// Soft-delete criterion applied by the consolidation scheduler
    pub fn should_archive(
        &self,
        now: DateTime<Utc>,
        confidence_threshold: f64,
        min_samples: u64,
        min_observation: Duration,
    ) -> bool {
        !self.archived
            && self.confidence_score < confidence_threshold
            && self.performance.sample_size < min_samples
            && now - self.created_at >= min_observation
    }

    /// Explicit strategy replacement: the only operation that resets performance
    pub fn replace_parameters(&mut self, parameters: StrategyParameters) {
        self.parameters = parameters;
        self.performance = Performance::default();
        self.q_value = 0.0;
        self.confidence_score = 0.5;
        self.validation_status = ValidationStatus::NeedsValidation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategy() {
        let strategy = Strategy::default_for(LearningDomain::ProposalGeneration, "gsa/services");
        assert_eq!(strategy.confidence_score, 0.5);
        assert_eq!(strategy.validation_status, ValidationStatus::NeedsValidation);
        assert_eq!(strategy.version, 0);
        match strategy.parameters {
            StrategyParameters::Proposal(p) => assert_eq!(p.pricing_margin, 0.15),
            other => panic!("unexpected parameters: {:?}", other),
        }

        let nav = Strategy::default_for(LearningDomain::PortalNavigation, "portal-1");
        match nav.parameters {
            StrategyParameters::Navigation(p) => {
                assert!(p.base_wait_ms >= 2_000 && p.max_wait_ms <= 5_000);
                assert!(!p.selectors.is_empty());
            }
            other => panic!("unexpected parameters: {:?}", other),
        }
    }

    #[test]
    fn test_success_rate_tracks_wins() {
        let mut strategy = Strategy::default_for(LearningDomain::DocumentParsing, "pdf/rfp");
        let outcomes = [true, false, true, true, false];
        for (i, success) in outcomes.iter().enumerate() {
            strategy.record_outcome(*success, Some(100.0 * (i + 1) as f64), 0.02, 0.03);
            let p = &strategy.performance;
            assert_eq!(p.success_rate, p.wins as f64 / p.sample_size as f64);
        }
        assert_eq!(strategy.performance.sample_size, 5);
        assert_eq!(strategy.performance.error_count, 2);
        assert!((strategy.performance.average_latency_ms - 300.0).abs() < 1e-9);
        assert_eq!(strategy.validation_status, ValidationStatus::Validated);
    }

    #[test]
    fn test_impact_backfill() {
        let mut strategy = Strategy::default_for(LearningDomain::PortalNavigation, "portal-1");
        for _ in 0..10 {
            strategy.record_outcome(false, None, 0.02, 0.03);
        }
        strategy.push_adaptation(TriggerKind::TimeoutPattern, vec![], None);
        assert!(strategy.resolve_pending_impacts(5).is_empty());

        for _ in 0..5 {
            strategy.record_outcome(true, None, 0.02, 0.03);
        }
        let confidence_before = strategy.confidence_score;
        let resolved = strategy.resolve_pending_impacts(5);
        assert_eq!(resolved, vec![(TriggerKind::TimeoutPattern, 1.0)]);
        assert_eq!(strategy.adaptation_history[0].impact_score, Some(1.0));
        assert!(strategy.confidence_score > confidence_before);

        // Already resolved entries are left alone
        assert!(strategy.resolve_pending_impacts(5).is_empty());
    }

    #[test]
    fn test_adapted_recently() {
        let mut strategy = Strategy::default_for(LearningDomain::PortalNavigation, "portal-1");
        strategy.push_adaptation(TriggerKind::TimeoutPattern, vec![], None);
        assert!(strategy.adapted_recently(TriggerKind::TimeoutPattern, 3));
        assert!(!strategy.adapted_recently(TriggerKind::LowSuccessRate, 3));
        for _ in 0..3 {
            strategy.record_outcome(true, None, 0.02, 0.03);
        }
        assert!(!strategy.adapted_recently(TriggerKind::TimeoutPattern, 3));
    }

    #[test]
    fn test_archive_criterion() {
        let mut strategy = Strategy::default_for(LearningDomain::PortalNavigation, "portal-1");
        strategy.confidence_score = 0.3;
        let now = Utc::now();
        assert!(!strategy.should_archive(now, 0.4, 20, Duration::days(7)));
        assert!(strategy.should_archive(now + Duration::days(8), 0.4, 20, Duration::days(7)));

        strategy.performance.sample_size = 25;
        assert!(!strategy.should_archive(now + Duration::days(8), 0.4, 20, Duration::days(7)));
    }

    #[test]
    fn test_replace_parameters_resets_performance() {
        let mut strategy = Strategy::default_for(LearningDomain::ProposalGeneration, "k");
        strategy.record_outcome(true, None, 0.02, 0.03);
        strategy.q_value = 0.8;
        strategy.replace_parameters(StrategyParameters::defaults_for(LearningDomain::ProposalGeneration));
        assert_eq!(strategy.performance, Performance::default());
        assert_eq!(strategy.q_value, 0.0);
    }

    #[test]
    fn test_trim_history_keeps_latest() {
        let mut strategy = Strategy::default_for(LearningDomain::DocumentParsing, "k");
        for trigger in [TriggerKind::LowSuccessRate, TriggerKind::TimeoutPattern, TriggerKind::ValidationFailure] {
            strategy.push_adaptation(trigger, vec![], None);
        }
        strategy.trim_history(2);
        assert_eq!(strategy.adaptation_history.len(), 2);
        assert_eq!(strategy.adaptation_history[0].trigger, TriggerKind::TimeoutPattern);
    }

    #[test]
    fn test_parameters_serialization_is_tagged() {
        let params = StrategyParameters::defaults_for(LearningDomain::DocumentParsing);
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["kind"], "parsing");
        let parsed: StrategyParameters = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, params);
    }
}
