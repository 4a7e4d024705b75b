// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Reinforcement Learner
//!
//! Tabular Q-learning over `(domain, task_type, categorical context)` states
//! with epsilon-greedy selection between the strategy variants of a key.
//!
//! The Q-table lives in the outcome store, so a restarted engine keeps what it
//! learned and engines sharing a store share one table.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use crate::domain::config::LearningConfig;
use crate::domain::error::StoreError;
use crate::domain::event::LearningEvent;
use crate::domain::events::SelectionMode;
use crate::domain::learning_state::{max_value, q_update, QUpdate, StateKey};
use crate::domain::repository::OutcomeStore;
use crate::domain::strategy::{Strategy, StrategyId};

pub struct ReinforcementLearner {
    config: LearningConfig,
    store: Arc<dyn OutcomeStore>,
    rng: Mutex<StdRng>,
}

impl ReinforcementLearner {
    /// Seeded from `config.seed` when set, otherwise from the OS
    pub fn new(config: LearningConfig, store: Arc<dyn OutcomeStore>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::with_rng(config, store, rng)
    }

    pub fn with_rng(config: LearningConfig, store: Arc<dyn OutcomeStore>, rng: StdRng) -> Self {
        Self {
            config,
            store,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Explicit reward if the caller supplied one, otherwise the configured
    /// success/failure reward plus metric bonuses
    pub fn derive_reward(&self, event: &LearningEvent) -> f64 {
        if let Some(reward) = event.reward {
            return reward;
        }
        let base = if event.outcome.success {
            self.config.success_reward
        } else {
            self.config.failure_reward
        };
        let bonus: f64 = self
            .config
            .metric_bonuses
            .iter()
            .filter_map(|(metric, weight)| event.outcome.metrics.get(metric).map(|v| v * weight))
            .sum();
        base + bonus
    }

    /// Best Q known for `state`; 0.0 for an unseen state
    pub async fn max_q(&self, state: &StateKey) -> Result<f64, StoreError> {
        Ok(max_value(&self.store.q_values(state).await?))
    }

    pub async fn state_q(&self, state: &StateKey, strategy_id: StrategyId) -> Result<Option<f64>, StoreError> {
        Ok(self.store.q_values(state).await?.get(&strategy_id).copied())
    }

    /// Update the state-action entry and return the new value. An unseen
    /// pair starts from `initial`.
    pub async fn update_state(
        &self,
        state: &StateKey,
        strategy_id: StrategyId,
        initial: f64,
        reward: f64,
    ) -> Result<f64, StoreError> {
        self.store
            .apply_q_update(&QUpdate {
                state: state.clone(),
                strategy_id,
                initial,
                reward,
                learning_rate: self.config.learning_rate,
                discount_factor: self.config.discount_factor,
            })
            .await
    }

    /// Update a strategy's aggregate Q-value in place
    pub fn update_strategy(&self, strategy: &mut Strategy, reward: f64, max_next_q: f64) {
        strategy.q_value = q_update(
            strategy.q_value,
            reward,
            max_next_q,
            self.config.learning_rate,
            self.config.discount_factor,
        );
    }

    /// Epsilon-greedy choice among `candidates`. Exploitation picks the first
    /// candidate with the highest `q_value * success_rate`.
    pub fn select(&self, candidates: &[Strategy]) -> Option<(usize, SelectionMode)> {
        if candidates.is_empty() {
            return None;
        }
        let mut rng = self.rng.lock();
        if rng.random::<f64>() < self.config.epsilon {
            let index = rng.random_range(0..candidates.len());
            return Some((index, SelectionMode::Explore));
        }
        drop(rng);

        let mut best = 0;
        for (i, candidate) in candidates.iter().enumerate().skip(1) {
            if candidate.selection_score() > candidates[best].selection_score() {
                best = i;
            }
        }
        Some((best, SelectionMode::Exploit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{ErrorDetails, ErrorKind, LearningDomain, Outcome, TaskContext, TASK_ID_FIELD};
    use crate::infrastructure::memory_store::InMemoryOutcomeStore;

    fn learner(epsilon: f64, seed: u64) -> ReinforcementLearner {
        learner_on(Arc::new(InMemoryOutcomeStore::new()), epsilon, seed)
    }

    fn learner_on(store: Arc<InMemoryOutcomeStore>, epsilon: f64, seed: u64) -> ReinforcementLearner {
        ReinforcementLearner::with_rng(
            LearningConfig {
                epsilon,
                ..Default::default()
            },
            store,
            StdRng::seed_from_u64(seed),
        )
    }

    fn candidates() -> Vec<Strategy> {
        let mut strategies: Vec<Strategy> = (0..3)
            .map(|_| Strategy::default_for(LearningDomain::ProposalGeneration, "gsa"))
            .collect();
        strategies[0].q_value = 0.5;
        strategies[0].performance.success_rate = 0.5;
        strategies[1].q_value = 0.9;
        strategies[1].performance.success_rate = 0.8;
        strategies[2].q_value = 0.9;
        strategies[2].performance.success_rate = 0.8;
        strategies
    }

    #[test]
    fn test_epsilon_zero_always_exploits_first_max() {
        let learner = learner(0.0, 7);
        let candidates = candidates();
        for _ in 0..100 {
            assert_eq!(learner.select(&candidates), Some((1, SelectionMode::Exploit)));
        }
    }

    #[test]
    fn test_epsilon_one_explores_uniformly() {
        let learner = learner(1.0, 42);
        let candidates = candidates();
        let mut counts = [0usize; 3];
        for _ in 0..3000 {
            let (index, mode) = learner.select(&candidates).unwrap();
            assert_eq!(mode, SelectionMode::Explore);
            counts[index] += 1;
        }
        for count in counts {
            assert!((800..=1200).contains(&count), "counts not uniform: {:?}", counts);
        }
    }

    #[test]
    fn test_empty_candidates() {
        assert!(learner(0.2, 1).select(&[]).is_none());
    }

    #[test]
    fn test_reward_derivation() {
        let learner = learner(0.2, 1);
        let success = LearningEvent::new(
            "writer",
            LearningDomain::ProposalGeneration,
            "gsa",
            "bid",
            Outcome::success().with_metric("quality_score", 0.5),
        );
        assert!((learner.derive_reward(&success) - 1.1).abs() < 1e-12);

        let failure = LearningEvent::new(
            "writer",
            LearningDomain::ProposalGeneration,
            "gsa",
            "bid",
            Outcome::failure(ErrorDetails::new(ErrorKind::Other, "lost")),
        );
        assert_eq!(learner.derive_reward(&failure), -0.5);
        assert_eq!(learner.derive_reward(&failure.clone().with_reward(3.0)), 3.0);
    }

    #[tokio::test]
    async fn test_state_table_bootstraps_from_same_state() {
        let learner = learner(0.2, 1);
        let mut context = TaskContext::new();
        context.insert("portal_type".to_string(), "bonfire".into());
        let state = StateKey::new(LearningDomain::PortalNavigation, "scan", &context);
        let id = StrategyId::new();

        assert_eq!(learner.max_q(&state).await.unwrap(), 0.0);
        let first = learner.update_state(&state, id, 0.0, 1.0).await.unwrap();
        assert!((first - 0.1).abs() < 1e-12);
        let second = learner.update_state(&state, id, 0.0, 1.0).await.unwrap();
        assert!((second - (0.1 + 0.1 * (1.0 + 0.95 * 0.1 - 0.1))).abs() < 1e-12);
        assert_eq!(learner.state_q(&state, id).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_table_survives_a_new_learner_and_ignores_task_ids() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let learner = learner_on(store.clone(), 0.2, 1);
        let id = StrategyId::new();

        let mut last = None;
        for i in 0..50 {
            let mut context = TaskContext::new();
            context.insert(TASK_ID_FIELD.to_string(), format!("rfp-{}", i).into());
            context.insert("portal_type".to_string(), "bonfire".into());
            let state = StateKey::new(LearningDomain::PortalNavigation, "scan", &context);
            learner.update_state(&state, id, 0.0, 1.0).await.unwrap();
            last = Some(state);
        }
        assert_eq!(store.q_state_count().await, 1);

        let state = last.unwrap();
        let learned = learner.max_q(&state).await.unwrap();
        assert!(learned > 1.0);
        let restarted = learner_on(store, 0.2, 2);
        assert_eq!(restarted.max_q(&state).await.unwrap(), learned);
    }
}
