// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Synthetic executor for `safla simulate`
//!
//! Plays the role of the browser/parser/proposal collaborator against a
//! hidden [`Environment`]. Strategies that fit the environment succeed more
//! often, so a run shows whether the engine converges. All randomness comes
//! from one seeded RNG; the same seed replays the same run.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

use safla_engine::domain::collaborator::{ActionExecutor, ActionResult};
use safla_engine::domain::event::{ErrorDetails, ErrorKind, LearningDomain, TaskContext};
use safla_engine::domain::strategy::{Strategy, StrategyParameters};
use safla_engine::LearningEngine;

/// Conditions the simulated tasks run under
#[derive(Debug, Clone)]
pub struct Environment {
    /// Navigation waits shorter than this time out
    pub required_wait_ms: u64,
    /// Selector that no longer matches until it is flagged for replacement
    pub broken_selector: Option<String>,
    /// Parsing timeouts shorter than this time out
    pub required_parse_timeout_ms: u64,
    /// Margins above this lose most bids
    pub winning_margin: f64,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            required_wait_ms: 3_000,
            broken_selector: Some("results_table".to_string()),
            required_parse_timeout_ms: 45_000,
            winning_margin: 0.10,
        }
    }
}

pub struct SyntheticExecutor {
    environment: Environment,
    rng: Mutex<StdRng>,
    outcomes: Mutex<Vec<bool>>,
}

impl SyntheticExecutor {
    pub fn new(environment: Environment, seed: u64) -> Self {
        Self {
            environment,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            outcomes: Mutex::new(Vec::new()),
        }
    }

    /// Success flags of every executed action, in order
    pub fn outcomes(&self) -> Vec<bool> {
        self.outcomes.lock().clone()
    }

    fn simulate(&self, parameters: &StrategyParameters) -> ActionResult {
        let mut rng = self.rng.lock();
        match parameters {
            StrategyParameters::Navigation(p) => {
                let duration = Duration::from_millis(p.effective_wait_ms() * 3);
                if let Some(broken) = &self.environment.broken_selector {
                    let flagged = p.selectors.get(broken).is_some_and(|s| s.needs_replacement);
                    if !flagged && rng.random::<f64>() < 0.5 {
                        return ActionResult::failed(
                            duration,
                            ErrorDetails::new(ErrorKind::SelectorNotFound, "selector matched nothing")
                                .with_subject(broken.clone()),
                        );
                    }
                }
                let p_success = if p.effective_wait_ms() < self.environment.required_wait_ms {
                    0.3
                } else {
                    0.9
                };
                if rng.random::<f64>() < p_success {
                    ActionResult::succeeded(duration)
                } else {
                    ActionResult::failed(duration, ErrorDetails::new(ErrorKind::Timeout, "page did not load in time"))
                }
            }
            StrategyParameters::Parsing(p) => {
                let duration = Duration::from_millis(p.timeout_ms / 4);
                if p.timeout_ms < self.environment.required_parse_timeout_ms {
                    if rng.random::<f64>() < 0.35 {
                        ActionResult::succeeded(duration)
                    } else {
                        ActionResult::failed(
                            Duration::from_millis(p.timeout_ms),
                            ErrorDetails::new(ErrorKind::Timeout, "extraction timed out"),
                        )
                    }
                } else if rng.random::<f64>() < 0.9 {
                    ActionResult::succeeded(duration)
                } else {
                    ActionResult::failed(duration, ErrorDetails::new(ErrorKind::Validation, "missing required section"))
                }
            }
            StrategyParameters::Proposal(p) => {
                let duration = Duration::from_millis(500);
                let p_win = if p.pricing_margin > self.environment.winning_margin {
                    0.2
                } else {
                    0.55
                };
                if rng.random::<f64>() < p_win {
                    ActionResult::succeeded(duration)
                } else {
                    ActionResult::failed(duration, ErrorDetails::new(ErrorKind::Other, "bid lost"))
                }
            }
        }
    }
}

#[async_trait]
impl ActionExecutor for SyntheticExecutor {
    async fn execute_action(&self, strategy: &Strategy) -> anyhow::Result<ActionResult> {
        let result = self.simulate(&strategy.parameters);
        self.outcomes.lock().push(result.success);
        Ok(result)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub tasks: usize,
    pub successes: usize,
    /// Tasks the engine failed to record
    pub errors: usize,
    /// Success rate per block of `window` tasks
    pub curve: Vec<f64>,
}

/// Run `tasks` select → execute → record loops through the engine
pub async fn run_simulation(
    engine: &LearningEngine,
    executor: &SyntheticExecutor,
    domain: LearningDomain,
    key: &str,
    tasks: usize,
    window: usize,
) -> SimulationSummary {
    let mut errors = 0;
    for i in 0..tasks {
        let mut context = TaskContext::new();
        context.insert("task_id".to_string(), format!("sim-{}", i).into());
        context.insert("category".to_string(), "simulation".into());
        let run = engine
            .run_task(executor, "simulator", domain, key, "simulated", context)
            .await;
        if run.receipt.is_none() {
            warn!(task = i, strategy_id = %run.strategy_id, "Simulated task was not recorded");
            errors += 1;
        }
    }

    let outcomes = executor.outcomes();
    let curve = outcomes
        .chunks(window.max(1))
        .map(|chunk| chunk.iter().filter(|s| **s).count() as f64 / chunk.len() as f64)
        .collect();
    SimulationSummary {
        tasks,
        successes: outcomes.iter().filter(|s| **s).count(),
        errors,
        curve,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safla_engine::application::engine::Collaborators;
    use safla_engine::domain::config::EngineConfigSpec;
    use safla_engine::infrastructure::memory_store::InMemoryOutcomeStore;
    use std::sync::Arc;

    fn strategy(domain: LearningDomain) -> Strategy {
        Strategy::default_for(domain, "sim")
    }

    #[tokio::test]
    async fn test_same_seed_replays_same_outcomes() {
        let a = SyntheticExecutor::new(Environment::default(), 9);
        let b = SyntheticExecutor::new(Environment::default(), 9);
        for _ in 0..50 {
            let s = strategy(LearningDomain::DocumentParsing);
            a.execute_action(&s).await.unwrap();
            b.execute_action(&s).await.unwrap();
        }
        assert_eq!(a.outcomes(), b.outcomes());
    }

    #[tokio::test]
    async fn test_short_waits_mostly_fail() {
        let executor = SyntheticExecutor::new(Environment::default(), 1);
        let s = strategy(LearningDomain::PortalNavigation);
        for _ in 0..200 {
            executor.execute_action(&s).await.unwrap();
        }
        let successes = executor.outcomes().iter().filter(|s| **s).count();
        assert!(successes < 100, "{} successes", successes);
    }

    #[tokio::test]
    async fn test_engine_improves_navigation_over_run() {
        let mut config = EngineConfigSpec::default();
        config.learning.seed = Some(5);
        config.consolidation.random_trigger_probability = 0.0;
        let engine = LearningEngine::new(Arc::new(InMemoryOutcomeStore::new()), config, Collaborators::default());
        let executor = SyntheticExecutor::new(Environment::default(), 5);

        let summary = run_simulation(&engine, &executor, LearningDomain::PortalNavigation, "portal", 300, 10).await;
        assert_eq!(summary.tasks, 300);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.curve.len(), 30);

        let first = summary.curve[0];
        let late: f64 = summary.curve[25..].iter().sum::<f64>() / 5.0;
        assert!(late > first, "first block {:.2}, late blocks {:.2}", first, late);
    }
}
