// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Adaptation Engine - maps insights to strategy mutations
//!
//! Mutations are pure functions of `(strategy, insight, config)` and run
//! inside a [`StrategyRepository::merge_if`](super::strategy_repository::StrategyRepository::merge_if)
//! closure, so they may be re-applied against a fresh read after a version
//! conflict. Side effects (selector discovery requests) are issued by the
//! caller once the merge has been persisted.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Deterministic parameter mutation per trigger kind

use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::collaborator::SelectorDiscovery;
use crate::domain::config::AdaptationConfig;
use crate::domain::insight::{Insight, TriggerKind};
use crate::domain::strategy::{
    NarrativeTone, NavigationParams, ParameterChange, ParsingParams, SelectorCandidates, Strategy,
    StrategyParameters, ValidationSeverity, ValidationStatus,
};

/// Parsing timeouts are never scaled past this
const MAX_PARSE_TIMEOUT_MS: u64 = 300_000;
const MIN_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// One mutation applied to a strategy
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedAdaptation {
    pub trigger: TriggerKind,
    pub changes: Vec<ParameterChange>,
    /// Selector keys that need replacement candidates from discovery
    pub discovery_requests: Vec<String>,
}

pub struct AdaptationEngine {
    config: AdaptationConfig,
    discovery: Arc<dyn SelectorDiscovery>,
}

impl AdaptationEngine {
    pub fn new(config: AdaptationConfig, discovery: Arc<dyn SelectorDiscovery>) -> Self {
        Self { config, discovery }
    }

    pub fn config(&self) -> &AdaptationConfig {
        &self.config
    }

    /// Apply every insight in rank order. Selector failures are folded into a
    /// single mutation so one batch never trips its own cooldown.
    pub fn apply_all(&self, strategy: &mut Strategy, insights: &[Insight]) -> Vec<AppliedAdaptation> {
        let mut applied = Vec::new();
        let mut selector_subjects: Vec<&str> = Vec::new();

        for insight in insights {
            if insight.trigger == TriggerKind::SelectorFailure {
                if let Some(subject) = insight.subject.as_deref() {
                    if !selector_subjects.contains(&subject) {
                        selector_subjects.push(subject);
                    }
                }
                continue;
            }
            if applied.iter().any(|a: &AppliedAdaptation| a.trigger == insight.trigger) {
                continue;
            }
            if let Some(adaptation) = self.apply(strategy, insight) {
                applied.push(adaptation);
            }
        }

        if !selector_subjects.is_empty() {
            if let Some(adaptation) = self.replace_selectors(strategy, &selector_subjects) {
                applied.push(adaptation);
            }
        }
        applied
    }

    /// Apply one insight. `None` when the trigger is cooling down, does not
    /// apply to the strategy's domain, or would change nothing.
    pub fn apply(&self, strategy: &mut Strategy, insight: &Insight) -> Option<AppliedAdaptation> {
        if insight.trigger == TriggerKind::SelectorFailure {
            let subject = insight.subject.as_deref()?;
            return self.replace_selectors(strategy, &[subject]);
        }
        if strategy.adapted_recently(insight.trigger, self.config.cooldown_samples) {
            debug!(
                strategy_id = %strategy.id,
                trigger = %insight.trigger,
                "Trigger is cooling down, skipping adaptation"
            );
            return None;
        }

        let severity = insight.impact_estimate.clamp(0.0, 1.0);
        let changes = match insight.trigger {
            TriggerKind::LowSuccessRate => self.low_success(&mut strategy.parameters, severity),
            TriggerKind::TimeoutPattern => self.timeouts(&mut strategy.parameters, severity),
            TriggerKind::ValidationFailure => refresh(strategy),
            TriggerKind::LowWinRate => self.low_win_rate(&mut strategy.parameters),
            TriggerKind::SelectorFailure | TriggerKind::ContextCorrelation | TriggerKind::TransferLearning => {
                Vec::new()
            }
        };
        self.finish(strategy, insight.trigger, changes, Vec::new(), Some(insight.pattern.clone()))
    }

    fn finish(
        &self,
        strategy: &mut Strategy,
        trigger: TriggerKind,
        changes: Vec<ParameterChange>,
        discovery_requests: Vec<String>,
        note: Option<String>,
    ) -> Option<AppliedAdaptation> {
        if changes.is_empty() {
            return None;
        }
        strategy.push_adaptation(trigger, changes.clone(), note);
        strategy.trim_history(self.config.history_limit);
        Some(AppliedAdaptation {
            trigger,
            changes,
            discovery_requests,
        })
    }

    fn low_success(&self, parameters: &mut StrategyParameters, severity: f64) -> Vec<ParameterChange> {
        let multiplier = scale(
            self.config.low_success_multiplier_min,
            self.config.low_success_multiplier_max,
            severity,
        );
        let mut changes = Vec::new();
        match parameters {
            StrategyParameters::Navigation(p) => {
                let ceiling = self.config.max_wait_ceiling_ms as f64 / p.base_wait_ms.max(1) as f64;
                let next = (p.timing_multiplier * multiplier).min(ceiling.max(1.0));
                if next != p.timing_multiplier {
                    changes.push(ParameterChange::new("timing_multiplier", p.timing_multiplier, next));
                    p.timing_multiplier = next;
                }
                let degraded = self.config.degraded_selector_score;
                for (name, selector) in p.selectors.iter_mut() {
                    if selector.score <= degraded && !selector.needs_replacement {
                        changes.push(ParameterChange::new(
                            format!("selectors.{}.needs_replacement", name),
                            false,
                            true,
                        ));
                        selector.needs_replacement = true;
                    }
                }
            }
            StrategyParameters::Parsing(p) => {
                scale_parse_timeout(p, multiplier, &mut changes);
                let next = (p.confidence_threshold - 0.05).max(MIN_CONFIDENCE_THRESHOLD);
                if next < p.confidence_threshold {
                    changes.push(ParameterChange::new("confidence_threshold", p.confidence_threshold, next));
                    p.confidence_threshold = next;
                }
            }
            StrategyParameters::Proposal(p) => {
                if !p.margin_under_review {
                    changes.push(ParameterChange::new("margin_under_review", false, true));
                    p.margin_under_review = true;
                }
            }
        }
        changes
    }

    fn timeouts(&self, parameters: &mut StrategyParameters, severity: f64) -> Vec<ParameterChange> {
        let multiplier = scale(self.config.timeout_multiplier_min, self.config.timeout_multiplier_max, severity);
        let mut changes = Vec::new();
        match parameters {
            StrategyParameters::Navigation(p) => self.scale_waits(p, multiplier, &mut changes),
            StrategyParameters::Parsing(p) => scale_parse_timeout(p, multiplier, &mut changes),
            StrategyParameters::Proposal(_) => {}
        }
        changes
    }

    fn scale_waits(&self, p: &mut NavigationParams, multiplier: f64, changes: &mut Vec<ParameterChange>) {
        let ceiling = self.config.max_wait_ceiling_ms;
        let mut scale_one = |name: &str, value: &mut u64| {
            let next = ((*value as f64 * multiplier).round() as u64).min(ceiling);
            if next != *value {
                changes.push(ParameterChange::new(name, *value, next));
                *value = next;
            }
        };
        scale_one("base_wait_ms", &mut p.base_wait_ms);
        scale_one("max_wait_ms", &mut p.max_wait_ms);
        scale_one("page_load_wait_ms", &mut p.page_load_wait_ms);
        if p.max_wait_ms < p.base_wait_ms {
            p.max_wait_ms = p.base_wait_ms;
        }
    }

    fn low_win_rate(&self, parameters: &mut StrategyParameters) -> Vec<ParameterChange> {
        let StrategyParameters::Proposal(p) = parameters else {
            return Vec::new();
        };
        let mut changes = Vec::new();
        if p.narrative_tone != NarrativeTone::Conservative {
            changes.push(ParameterChange::new(
                "narrative_tone",
                tone_name(p.narrative_tone),
                tone_name(NarrativeTone::Conservative),
            ));
            p.narrative_tone = NarrativeTone::Conservative;
        }
        let floor = self.config.margin_floor.max(p.min_margin);
        let next = round_margin((p.pricing_margin - self.config.margin_step).max(floor));
        if next < p.pricing_margin {
            changes.push(ParameterChange::new("pricing_margin", p.pricing_margin, next));
            p.pricing_margin = next;
        }
        changes
    }

    fn replace_selectors(&self, strategy: &mut Strategy, subjects: &[&str]) -> Option<AppliedAdaptation> {
        if strategy.adapted_recently(TriggerKind::SelectorFailure, self.config.cooldown_samples) {
            debug!(strategy_id = %strategy.id, "Selector replacement is cooling down");
            return None;
        }
        let StrategyParameters::Navigation(p) = &mut strategy.parameters else {
            return None;
        };

        let degraded = self.config.degraded_selector_score;
        let mut changes = Vec::new();
        for subject in subjects {
            let selector = p
                .selectors
                .entry(subject.to_string())
                .or_insert_with(|| SelectorCandidates::new(*subject, &[]));
            if selector.score != degraded {
                changes.push(ParameterChange::new(format!("selectors.{}.score", subject), selector.score, degraded));
                selector.score = degraded;
            }
            if !selector.needs_replacement {
                changes.push(ParameterChange::new(
                    format!("selectors.{}.needs_replacement", subject),
                    false,
                    true,
                ));
                selector.needs_replacement = true;
            }
        }

        let requests: Vec<String> = subjects.iter().map(|s| s.to_string()).collect();
        let note = Some(format!("selectors flagged: {}", requests.join(", ")));
        self.finish(strategy, TriggerKind::SelectorFailure, changes, requests, note)
    }

    /// Ask the discovery collaborator for replacements. Failures are logged;
    /// the adaptation itself has already been persisted.
    pub async fn request_discovery(&self, key: &str, adaptations: &[AppliedAdaptation]) {
        let selectors: Vec<String> = adaptations
            .iter()
            .flat_map(|a| a.discovery_requests.iter().cloned())
            .collect();
        if selectors.is_empty() {
            return;
        }
        if let Err(e) = self.discovery.request_replacements(key, &selectors).await {
            warn!(key, ?selectors, error = %e, "Selector discovery request failed");
        }
    }
}

/// Full strategy refresh after validation failures
fn refresh(strategy: &mut Strategy) -> Vec<ParameterChange> {
    let mut changes = Vec::new();
    if strategy.validation_status != ValidationStatus::NeedsValidation {
        changes.push(ParameterChange::new("validation_status", "validated", "needs_validation"));
        strategy.validation_status = ValidationStatus::NeedsValidation;
    }
    match &mut strategy.parameters {
        StrategyParameters::Parsing(p) if p.validation_severity != ValidationSeverity::Strict => {
            let next = match p.validation_severity {
                ValidationSeverity::Lenient => ValidationSeverity::Standard,
                _ => ValidationSeverity::Strict,
            };
            changes.push(ParameterChange::new(
                "validation_severity",
                severity_name(p.validation_severity),
                severity_name(next),
            ));
            p.validation_severity = next;
        }
        StrategyParameters::Proposal(p) if p.compliance_strictness != ValidationSeverity::Strict => {
            changes.push(ParameterChange::new(
                "compliance_strictness",
                severity_name(p.compliance_strictness),
                severity_name(ValidationSeverity::Strict),
            ));
            p.compliance_strictness = ValidationSeverity::Strict;
        }
        _ => {}
    }
    changes
}

fn scale_parse_timeout(p: &mut ParsingParams, multiplier: f64, changes: &mut Vec<ParameterChange>) {
    let next = ((p.timeout_ms as f64 * multiplier).round() as u64).min(MAX_PARSE_TIMEOUT_MS);
    if next != p.timeout_ms {
        changes.push(ParameterChange::new("timeout_ms", p.timeout_ms, next));
        p.timeout_ms = next;
    }
}

/// Linear interpolation between `min` and `max` by `severity` in [0, 1]
fn scale(min: f64, max: f64, severity: f64) -> f64 {
    min + (max - min) * severity.clamp(0.0, 1.0)
}

fn round_margin(margin: f64) -> f64 {
    (margin * 10_000.0).round() / 10_000.0
}

fn tone_name(tone: NarrativeTone) -> &'static str {
    match tone {
        NarrativeTone::Balanced => "balanced",
        NarrativeTone::Assertive => "assertive",
        NarrativeTone::Conservative => "conservative",
    }
}

fn severity_name(severity: ValidationSeverity) -> &'static str {
    match severity {
        ValidationSeverity::Lenient => "lenient",
        ValidationSeverity::Standard => "standard",
        ValidationSeverity::Strict => "strict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::collaborator::NoopSelectorDiscovery;
    use crate::domain::event::LearningDomain;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    fn engine() -> AdaptationEngine {
        AdaptationEngine::new(AdaptationConfig::default(), Arc::new(NoopSelectorDiscovery))
    }

    fn navigation(strategy: &Strategy) -> &NavigationParams {
        match &strategy.parameters {
            StrategyParameters::Navigation(p) => p,
            other => panic!("unexpected parameters: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_pattern_scales_all_waits() {
        let mut strategy = Strategy::default_for(LearningDomain::PortalNavigation, "portal-1");
        let insight = Insight::new(TriggerKind::TimeoutPattern, "timeouts", "wait").with_impact(1.0);

        let applied = engine().apply(&mut strategy, &insight).unwrap();
        assert_eq!(applied.changes.len(), 3);
        let p = navigation(&strategy);
        assert_eq!(p.base_wait_ms, 3_000);
        assert_eq!(p.max_wait_ms, 7_500);
        assert_eq!(p.page_load_wait_ms, 4_500);
        assert_eq!(strategy.adaptation_history.len(), 1);
        assert_eq!(strategy.adaptation_history[0].impact_score, None);
    }

    #[test]
    fn test_cooldown_blocks_repeat() {
        let mut strategy = Strategy::default_for(LearningDomain::PortalNavigation, "portal-1");
        let insight = Insight::new(TriggerKind::TimeoutPattern, "timeouts", "wait").with_impact(0.5);
        assert!(engine().apply(&mut strategy, &insight).is_some());
        assert!(engine().apply(&mut strategy, &insight).is_none());

        for _ in 0..10 {
            strategy.record_outcome(false, None, 0.02, 0.03);
        }
        assert!(engine().apply(&mut strategy, &insight).is_some());
    }

    #[test]
    fn test_low_success_multiplier_scales_with_severity() {
        let mut mild = Strategy::default_for(LearningDomain::PortalNavigation, "a");
        let mut severe = Strategy::default_for(LearningDomain::PortalNavigation, "b");
        engine().apply(&mut mild, &Insight::new(TriggerKind::LowSuccessRate, "low", "fix").with_impact(0.0));
        engine().apply(&mut severe, &Insight::new(TriggerKind::LowSuccessRate, "low", "fix").with_impact(1.0));
        assert!((navigation(&mild).timing_multiplier - 1.2).abs() < 1e-9);
        assert!((navigation(&severe).timing_multiplier - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_low_win_rate_floors_margin() {
        let mut strategy = Strategy::default_for(LearningDomain::ProposalGeneration, "gsa");
        let insight = Insight::new(TriggerKind::LowWinRate, "losing", "cheaper").with_impact(0.8);
        let engine = AdaptationEngine::new(
            AdaptationConfig {
                cooldown_samples: 0,
                ..Default::default()
            },
            Arc::new(NoopSelectorDiscovery),
        );

        for _ in 0..10 {
            engine.apply(&mut strategy, &insight);
        }
        match &strategy.parameters {
            StrategyParameters::Proposal(p) => {
                assert_eq!(p.narrative_tone, NarrativeTone::Conservative);
                assert!((p.pricing_margin - 0.05).abs() < 1e-9);
            }
            other => panic!("unexpected parameters: {:?}", other),
        }
        // 0.15 -> 0.05 in five steps, then nothing left to change
        assert_eq!(strategy.adaptation_history.len(), 5);
    }

    #[test]
    fn test_low_win_rate_ignored_outside_proposals() {
        let mut strategy = Strategy::default_for(LearningDomain::DocumentParsing, "rfp");
        let insight = Insight::new(TriggerKind::LowWinRate, "losing", "cheaper").with_impact(0.8);
        assert!(engine().apply(&mut strategy, &insight).is_none());
        assert!(strategy.adaptation_history.is_empty());
    }

    #[test]
    fn test_context_correlation_is_informational() {
        let mut strategy = Strategy::default_for(LearningDomain::PortalNavigation, "portal-1");
        let insight = Insight::new(TriggerKind::ContextCorrelation, "lift", "note").with_impact(1.0);
        assert!(engine().apply(&mut strategy, &insight).is_none());
    }

    #[test]
    fn test_selector_failures_fold_into_one_entry() {
        let mut strategy = Strategy::default_for(LearningDomain::PortalNavigation, "portal-1");
        let insights = vec![
            Insight::new(TriggerKind::SelectorFailure, "a", "b")
                .with_subject("results_table")
                .with_impact(0.6),
            Insight::new(TriggerKind::SelectorFailure, "a", "b")
                .with_subject("login_button")
                .with_impact(0.4),
        ];
        let applied = engine().apply_all(&mut strategy, &insights);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].discovery_requests, vec!["results_table", "login_button"]);

        let p = navigation(&strategy);
        assert_eq!(p.selectors["results_table"].score, 0.3);
        assert!(p.selectors["login_button"].needs_replacement);
        assert_eq!(strategy.adaptation_history.len(), 1);
    }

    #[test]
    fn test_validation_failure_refreshes() {
        let mut strategy = Strategy::default_for(LearningDomain::DocumentParsing, "rfp");
        strategy.record_outcome(true, None, 0.02, 0.03);
        assert_eq!(strategy.validation_status, ValidationStatus::Validated);

        let insight = Insight::new(TriggerKind::ValidationFailure, "invalid", "refresh").with_impact(0.5);
        engine().apply(&mut strategy, &insight).unwrap();
        assert_eq!(strategy.validation_status, ValidationStatus::NeedsValidation);
    }

    struct RecordingDiscovery {
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl SelectorDiscovery for RecordingDiscovery {
        async fn request_replacements(&self, key: &str, selectors: &[String]) -> anyhow::Result<()> {
            self.calls.lock().await.push((key.to_string(), selectors.to_vec()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_discovery_requested_for_flagged_selectors() {
        let discovery = Arc::new(RecordingDiscovery {
            calls: Mutex::new(Vec::new()),
        });
        let engine = AdaptationEngine::new(AdaptationConfig::default(), discovery.clone());
        let mut strategy = Strategy::default_for(LearningDomain::PortalNavigation, "portal-1");
        let insight = Insight::new(TriggerKind::SelectorFailure, "miss", "replace").with_subject("next_page");

        let applied = engine.apply_all(&mut strategy, &[insight]);
        engine.request_discovery("portal-1", &applied).await;

        let calls = discovery.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("portal-1".to_string(), vec!["next_page".to_string()]));
    }
}
