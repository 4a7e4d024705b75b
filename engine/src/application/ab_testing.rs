// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! A/B Testing
//!
//! Compares two strategy variants of the same key with a two-proportion
//! z-test on their recorded wins. A winner is only declared below the
//! configured significance level; otherwise the test stays active and can be
//! analyzed again once more outcomes have accrued.

use std::sync::Arc;
use tracing::info;

use crate::domain::ab_test::{AbMetrics, AbTest, AbTestAnalysis, AbTestId, AbVariant};
use crate::domain::config::SelectionConfig;
use crate::domain::error::EngineError;
use crate::domain::repository::OutcomeStore;
use crate::domain::strategy::{Strategy, StrategyId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZTest {
    pub z: f64,
    /// Two-sided
    pub p_value: f64,
}

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Abramowitz & Stegun 7.1.26, absolute error below 1.5e-7
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

/// Pooled two-proportion z-test with a continuity correction of
/// `(1/n_a + 1/n_b) / 2`. `None` when either sample is empty.
///
/// Without the correction the discreteness of the counts pushes the false
/// positive rate of equal arms above the nominal level (about 5.2% at 1000
/// trials per arm and a 0.05 level); with it the rate stays below it.
pub fn two_proportion_z_test(successes_a: u64, n_a: u64, successes_b: u64, n_b: u64) -> Option<ZTest> {
    if n_a == 0 || n_b == 0 {
        return None;
    }
    let (n_a_f, n_b_f) = (n_a as f64, n_b as f64);
    let p_a = successes_a as f64 / n_a_f;
    let p_b = successes_b as f64 / n_b_f;
    let pooled = (successes_a + successes_b) as f64 / (n_a_f + n_b_f);
    let se = (pooled * (1.0 - pooled) * (1.0 / n_a_f + 1.0 / n_b_f)).sqrt();
    if se == 0.0 || !se.is_finite() {
        return Some(ZTest { z: 0.0, p_value: 1.0 });
    }
    let diff = p_a - p_b;
    let corrected = (diff.abs() - 0.5 * (1.0 / n_a_f + 1.0 / n_b_f)).max(0.0);
    let z = corrected.copysign(diff) / se;
    let p_value = (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0);
    Some(ZTest { z, p_value })
}

/// Winner (if significant), confidence and p-value for the given counts
pub fn decide(
    successes_a: u64,
    n_a: u64,
    successes_b: u64,
    n_b: u64,
    significance_level: f64,
) -> (Option<AbVariant>, f64, f64) {
    let Some(test) = two_proportion_z_test(successes_a, n_a, successes_b, n_b) else {
        return (None, 0.0, 1.0);
    };
    let winner = if test.p_value < significance_level {
        if test.z > 0.0 {
            Some(AbVariant::A)
        } else {
            Some(AbVariant::B)
        }
    } else {
        None
    };
    (winner, 1.0 - test.p_value, test.p_value)
}

/// Result of [`AbTestService::analyze`]
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedTest {
    pub analysis: AbTestAnalysis,
    pub test: AbTest,
    /// The winner was declared by this analysis
    pub newly_concluded: bool,
}

pub struct AbTestService {
    store: Arc<dyn OutcomeStore>,
    config: SelectionConfig,
}

impl AbTestService {
    pub fn new(store: Arc<dyn OutcomeStore>, config: SelectionConfig) -> Self {
        Self { store, config }
    }

    async fn strategy(&self, id: StrategyId) -> Result<Strategy, EngineError> {
        self.store
            .find_strategy(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("strategy {}", id)))
    }

    pub async fn create(&self, a: StrategyId, b: StrategyId) -> Result<AbTest, EngineError> {
        if a == b {
            return Err(EngineError::Validation("an A/B test needs two distinct strategies".to_string()));
        }
        let strategy_a = self.strategy(a).await?;
        let strategy_b = self.strategy(b).await?;
        if strategy_a.domain != strategy_b.domain || strategy_a.key != strategy_b.key {
            return Err(EngineError::Validation(format!(
                "strategies belong to different keys: {}/{} vs {}/{}",
                strategy_a.domain, strategy_a.key, strategy_b.domain, strategy_b.key
            )));
        }
        let available = strategy_a.performance.sample_size.min(strategy_b.performance.sample_size);
        if available < self.config.ab_min_samples {
            return Err(EngineError::InsufficientData {
                required: self.config.ab_min_samples as usize,
                available: available as usize,
            });
        }

        let test = AbTest::new(&strategy_a, &strategy_b);
        self.store.put_ab_test(&test).await?;
        info!(
            test_id = %test.id,
            domain = %test.domain,
            key = %test.key,
            strategy_a = %a,
            strategy_b = %b,
            "Created A/B test"
        );
        Ok(test)
    }

    /// Re-evaluate a test against the variants' current performance. A
    /// concluded test is reported as-is.
    pub async fn analyze(&self, id: AbTestId) -> Result<AnalyzedTest, EngineError> {
        let mut test = self
            .store
            .get_ab_test(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("A/B test {}", id)))?;

        if !test.is_active() {
            let analysis = AbTestAnalysis {
                test_id: test.id,
                winner: test.winner,
                confidence: test.statistical_significance,
                p_value: 1.0 - test.statistical_significance,
                recommendation: recommendation(test.winner),
            };
            return Ok(AnalyzedTest {
                analysis,
                test,
                newly_concluded: false,
            });
        }

        let a = self.strategy(test.strategy_a_id).await?;
        let b = self.strategy(test.strategy_b_id).await?;
        test.metrics = AbMetrics::from_strategies(&a, &b);

        let (winner, confidence, p_value) = decide(
            a.performance.wins,
            a.performance.sample_size,
            b.performance.wins,
            b.performance.sample_size,
            self.config.ab_significance_level,
        );
        match winner {
            Some(variant) => test.conclude(variant, confidence),
            None => test.statistical_significance = confidence,
        }
        self.store.put_ab_test(&test).await?;

        info!(
            test_id = %test.id,
            ?winner,
            p_value,
            "Analyzed A/B test"
        );
        let analysis = AbTestAnalysis {
            test_id: test.id,
            winner,
            confidence,
            p_value,
            recommendation: recommendation(winner),
        };
        Ok(AnalyzedTest {
            analysis,
            test,
            newly_concluded: winner.is_some(),
        })
    }
}

fn recommendation(winner: Option<AbVariant>) -> String {
    match winner {
        Some(AbVariant::A) => "Adopt strategy A and archive strategy B".to_string(),
        Some(AbVariant::B) => "Adopt strategy B and archive strategy A".to_string(),
        None => "No significant difference yet; keep collecting outcomes".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::LearningDomain;
    use crate::domain::strategy::StrategyParameters;
    use crate::infrastructure::memory_store::InMemoryOutcomeStore;

    #[test]
    fn test_normal_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-3);
    }

    #[test]
    fn test_z_test_detects_large_gap() {
        let test = two_proportion_z_test(80, 100, 50, 100).unwrap();
        assert!(test.z > 0.0);
        assert!(test.p_value < 0.001);

        let (winner, confidence, _) = decide(50, 100, 80, 100, 0.05);
        assert_eq!(winner, Some(AbVariant::B));
        assert!(confidence > 0.99);
    }

    #[test]
    fn test_no_winner_for_equal_rates() {
        let (winner, _, p) = decide(50, 100, 50, 100, 0.05);
        assert_eq!(winner, None);
        assert!((p - 1.0).abs() < 1e-6);
        assert!(two_proportion_z_test(0, 0, 1, 1).is_none());
        assert_eq!(two_proportion_z_test(10, 10, 5, 5).unwrap().p_value, 1.0);
    }

    async fn seeded(store: &InMemoryOutcomeStore, wins: u64, samples: u64) -> Strategy {
        let mut strategy = Strategy::new(
            LearningDomain::ProposalGeneration,
            "gsa",
            StrategyParameters::defaults_for(LearningDomain::ProposalGeneration),
        );
        for i in 0..samples {
            strategy.record_outcome(i < wins, None, 0.02, 0.03);
        }
        store.put_strategy(&strategy).await.unwrap();
        strategy
    }

    #[tokio::test]
    async fn test_service_concludes_significant_test() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let a = seeded(&store, 90, 100).await;
        let b = seeded(&store, 40, 100).await;
        let service = AbTestService::new(store.clone(), SelectionConfig::default());

        let test = service.create(a.id, b.id).await.unwrap();
        let analyzed = service.analyze(test.id).await.unwrap();
        assert_eq!(analyzed.analysis.winner, Some(AbVariant::A));
        assert!(analyzed.newly_concluded);
        assert!(!analyzed.test.is_active());
        assert_eq!(analyzed.test.winner_id(), Some(a.id));

        // Concluded tests are stable
        let again = service.analyze(test.id).await.unwrap();
        assert_eq!(again.analysis.winner, Some(AbVariant::A));
        assert!(!again.newly_concluded);
    }

    #[tokio::test]
    async fn test_service_requires_samples() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let a = seeded(&store, 2, 3).await;
        let b = seeded(&store, 1, 3).await;
        let service = AbTestService::new(store, SelectionConfig::default());
        let err = service.create(a.id, b.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { required: 5, available: 3 }));
    }
}
