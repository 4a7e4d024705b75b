// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pattern Analyzer
//!
//! Turns a window of recent learning events into ranked [`Insight`]s:
//! trigger-specific detectors (low success rate, timeouts, selector and
//! validation failures, low win rate) plus the success-rate lift of every
//! categorical context value against the window baseline.
//!
//! Below `min_samples` events the analyzer refuses to speak and returns
//! [`EngineError::InsufficientData`]; callers treat that as a no-op.

use std::collections::BTreeMap;

use crate::domain::config::AnalysisConfig;
use crate::domain::error::EngineError;
use crate::domain::event::{ErrorKind, LearningDomain, LearningEvent};
use crate::domain::insight::{Insight, TriggerKind};
use crate::domain::knowledge::FactorSummary;

pub struct PatternAnalyzer {
    config: AnalysisConfig,
}

/// Success counts over an event window
#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowStats {
    total: usize,
    successes: usize,
}

impl WindowStats {
    fn of<'a>(events: impl IntoIterator<Item = &'a LearningEvent>) -> Self {
        let mut stats = Self { total: 0, successes: 0 };
        for event in events {
            stats.total += 1;
            if event.outcome.success {
                stats.successes += 1;
            }
        }
        stats
    }

    fn failures(&self) -> usize {
        self.total - self.successes
    }

    fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successes as f64 / self.total as f64
        }
    }
}

impl PatternAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze `event` together with `history` (newest first). `history` may
    /// already contain `event`; it is counted once. Only the newest
    /// `window_size` events are considered.
    pub fn analyze(&self, event: &LearningEvent, history: &[LearningEvent]) -> Result<Vec<Insight>, EngineError> {
        let mut window: Vec<&LearningEvent> = Vec::with_capacity(self.config.window_size);
        window.push(event);
        window.extend(
            history
                .iter()
                .filter(|e| e.id != event.id && e.domain == event.domain)
                .take(self.config.window_size.saturating_sub(1)),
        );
        self.analyze_window(event.domain, &window)
    }

    /// Analyze an already assembled window
    pub fn analyze_window(&self, domain: LearningDomain, window: &[&LearningEvent]) -> Result<Vec<Insight>, EngineError> {
        if window.len() < self.config.min_samples {
            return Err(EngineError::InsufficientData {
                required: self.config.min_samples,
                available: window.len(),
            });
        }

        let stats = WindowStats::of(window.iter().copied());
        let mut insights = Vec::new();

        if let Some(insight) = self.detect_low_success(&stats) {
            insights.push(insight);
        }
        if let Some(insight) = self.detect_error_kind(window, &stats, ErrorKind::Timeout, TriggerKind::TimeoutPattern) {
            insights.push(insight);
        }
        if domain == LearningDomain::PortalNavigation {
            insights.extend(self.detect_selector_failures(window, &stats));
        }
        if let Some(insight) =
            self.detect_error_kind(window, &stats, ErrorKind::Validation, TriggerKind::ValidationFailure)
        {
            insights.push(insight);
        }
        if domain == LearningDomain::ProposalGeneration {
            if let Some(insight) = self.detect_low_win_rate(&stats) {
                insights.push(insight);
            }
        }
        insights.extend(self.context_insights(window, &stats));

        Ok(rank(insights, self.config.top_k))
    }

    fn detect_low_success(&self, stats: &WindowStats) -> Option<Insight> {
        let threshold = self.config.low_success_threshold;
        let rate = stats.rate();
        if threshold <= 0.0 || rate >= threshold {
            return None;
        }
        let severity = (threshold - rate) / threshold;
        Some(
            Insight::new(
                TriggerKind::LowSuccessRate,
                format!("Success rate {:.2} is below {:.2}", rate, threshold),
                "Slow down interactions and replace underperforming candidates",
            )
            .with_correlation(-severity)
            .with_impact(severity)
            .with_evidence(format!("{} of {} recent tasks succeeded", stats.successes, stats.total)),
        )
    }

    fn detect_error_kind(
        &self,
        window: &[&LearningEvent],
        stats: &WindowStats,
        kind: ErrorKind,
        trigger: TriggerKind,
    ) -> Option<Insight> {
        let failures = stats.failures();
        if failures == 0 {
            return None;
        }
        let occurrences = window
            .iter()
            .filter(|e| !e.outcome.success && e.outcome.error_kind() == Some(kind))
            .count();
        let share = occurrences as f64 / failures as f64;
        if occurrences < self.config.min_error_occurrences || share < self.config.error_share_threshold {
            return None;
        }

        let (pattern, recommendation) = match trigger {
            TriggerKind::TimeoutPattern => (
                format!("{} of {} failures were timeouts", occurrences, failures),
                "Increase wait times",
            ),
            _ => (
                format!("{} of {} failures were validation errors", occurrences, failures),
                "Re-validate the strategy before further use",
            ),
        };
        Some(
            Insight::new(trigger, pattern, recommendation)
                .with_correlation(-(occurrences as f64 / stats.total as f64))
                .with_impact(share)
                .with_evidence(format!("share of failures: {:.2}", share)),
        )
    }

    fn detect_selector_failures(&self, window: &[&LearningEvent], stats: &WindowStats) -> Vec<Insight> {
        let mut by_selector: BTreeMap<&str, usize> = BTreeMap::new();
        for event in window.iter().filter(|e| !e.outcome.success) {
            if let Some(details) = &event.outcome.error_details {
                if details.kind == ErrorKind::SelectorNotFound {
                    if let Some(subject) = details.subject.as_deref() {
                        *by_selector.entry(subject).or_default() += 1;
                    }
                }
            }
        }

        let failures = stats.failures().max(1);
        by_selector
            .into_iter()
            .filter(|(_, count)| *count >= self.config.min_error_occurrences)
            .map(|(selector, count)| {
                Insight::new(
                    TriggerKind::SelectorFailure,
                    format!("Selector '{}' failed to resolve {} times", selector, count),
                    format!("Replace selector '{}'", selector),
                )
                .with_subject(selector)
                .with_correlation(-(count as f64 / stats.total as f64))
                .with_impact(count as f64 / failures as f64)
                .with_evidence(format!("{} selector misses in {} tasks", count, stats.total))
            })
            .collect()
    }

    fn detect_low_win_rate(&self, stats: &WindowStats) -> Option<Insight> {
        let threshold = self.config.low_win_rate_threshold;
        let rate = stats.rate();
        if stats.total <= self.config.low_win_rate_min_samples || threshold <= 0.0 || rate >= threshold {
            return None;
        }
        let severity = (threshold - rate) / threshold;
        Some(
            Insight::new(
                TriggerKind::LowWinRate,
                format!("Win rate {:.2} is below {:.2}", rate, threshold),
                "Adopt a conservative narrative and lower the pricing margin",
            )
            .with_correlation(-severity)
            .with_impact(severity)
            .with_evidence(format!("{} wins in {} proposals", stats.successes, stats.total)),
        )
    }

    fn context_insights(&self, window: &[&LearningEvent], stats: &WindowStats) -> Vec<Insight> {
        context_lifts(window.iter().copied(), self.config.min_value_occurrences)
            .into_iter()
            .filter(|f| f.lift.abs() >= self.config.min_lift && f.occurrences < stats.total)
            .map(|f| {
                let direction = if f.lift > 0.0 { "succeed more" } else { "fail more" };
                Insight::new(
                    TriggerKind::ContextCorrelation,
                    format!("Tasks with {}={} {} often ({:+.2})", f.field, f.value, direction, f.lift),
                    format!("Account for {}={} when choosing a strategy", f.field, f.value),
                )
                .with_subject(f.field.clone())
                .with_correlation(f.lift)
                .with_impact(f.occurrences as f64 / stats.total as f64)
                .with_evidence(format!(
                    "{}={}: success rate {:.2} over {} tasks",
                    f.field, f.value, f.success_rate, f.occurrences
                ))
            })
            .collect()
    }
}

/// Success-rate lift of every categorical context value with at least
/// `min_occurrences` appearances, sorted by descending lift
pub fn context_lifts<'a>(
    events: impl IntoIterator<Item = &'a LearningEvent> + Clone,
    min_occurrences: usize,
) -> Vec<FactorSummary> {
    let baseline = WindowStats::of(events.clone()).rate();

    let mut groups: BTreeMap<(String, String), WindowStats> = BTreeMap::new();
    for event in events {
        for (field, value) in &event.context {
            let Some(category) = value.as_category() else {
                continue;
            };
            let entry = groups
                .entry((field.clone(), category))
                .or_insert(WindowStats { total: 0, successes: 0 });
            entry.total += 1;
            if event.outcome.success {
                entry.successes += 1;
            }
        }
    }

    let mut factors: Vec<FactorSummary> = groups
        .into_iter()
        .filter(|(_, s)| s.total >= min_occurrences.max(1))
        .map(|((field, value), s)| FactorSummary {
            field,
            value,
            success_rate: s.rate(),
            lift: s.rate() - baseline,
            occurrences: s.total,
        })
        .collect();
    factors.sort_by(|a, b| b.lift.total_cmp(&a.lift));
    factors
}

/// Order by `|correlation| * impact_estimate`, keep `top_k`
fn rank(mut insights: Vec<Insight>, top_k: usize) -> Vec<Insight> {
    insights.sort_by(|a, b| {
        b.rank_score()
            .total_cmp(&a.rank_score())
            .then_with(|| a.pattern.cmp(&b.pattern))
    });
    insights.truncate(top_k);
    insights
}
