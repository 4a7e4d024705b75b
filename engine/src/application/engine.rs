// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Learning Engine
//!
//! Facade over the learning pipeline. Each recorded outcome flows through:
//!
//! ```text
//! validate → append → reward → Q-update + performance merge
//!          → pattern analysis → adaptation → knowledge graph → events
//! ```
//!
//! Selection reads the key's candidate variants and picks one ε-greedily.
//! It never fails: when the store is slow or unreachable the last cached
//! strategy (or the domain defaults) is served instead.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrates repository, analyzer, adaptation, learner,
//!   knowledge graph, A/B tests, predictions and consolidation

use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::application::ab_testing::AbTestService;
use crate::application::adaptation_engine::{AdaptationEngine, AppliedAdaptation};
use crate::application::consolidation::{ConsolidationReport, ConsolidationScheduler};
use crate::application::pattern_analyzer::PatternAnalyzer;
use crate::application::predictive::PredictiveScorer;
use crate::application::recommendations::{self, Recommendation};
use crate::application::reinforcement::ReinforcementLearner;
use crate::application::strategy_repository::StrategyRepository;
use crate::application::transfer::{KnowledgeGraph, TaskProfile};
use crate::domain::ab_test::{AbTest, AbTestAnalysis, AbTestId};
use crate::domain::collaborator::{ActionExecutor, ActionResult, NoopSelectorDiscovery, SelectorDiscovery};
use crate::domain::config::EngineConfigSpec;
use crate::domain::error::EngineError;
use crate::domain::event::{
    ErrorDetails, ErrorKind, EventId, LearningDomain, LearningEvent, Outcome, TaskContext, LATENCY_METRIC,
};
use crate::domain::events::{EngineEvent, SelectionMode};
use crate::domain::insight::TriggerKind;
use crate::domain::learning_state::StateKey;
use crate::domain::repository::{EventQuery, OutcomeStore};
use crate::domain::strategy::{ParameterChange, Strategy, StrategyId, StrategyParameters};
use crate::infrastructure::event_bus::EventBus;

/// Events read per actor when assembling recommendations
const RECOMMENDATION_HISTORY: usize = 1000;

/// External collaborators the engine calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub selector_discovery: Arc<dyn SelectorDiscovery>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            selector_discovery: Arc::new(NoopSelectorDiscovery),
        }
    }
}

/// What `record_outcome` did with one event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordReceipt {
    pub event_id: EventId,
    pub strategy_id: StrategyId,
    pub reward: f64,
    pub q_value: f64,
    pub strategy_version: u64,
    /// Triggers applied because of this event
    pub adaptations: Vec<TriggerKind>,
    /// Earlier adaptations whose impact was measured by this event
    pub resolved_impacts: Vec<(TriggerKind, f64)>,
    /// False when the event was stored but the strategy merge gave up. The
    /// event still counts in later analysis; it must not be recorded again.
    pub strategy_updated: bool,
}

/// What `run_task` did: the strategy used, what the executor reported, and
/// the receipt when the outcome was recorded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRun {
    pub strategy_id: StrategyId,
    pub result: ActionResult,
    pub receipt: Option<RecordReceipt>,
}

pub struct LearningEngine {
    config: EngineConfigSpec,
    store: Arc<dyn OutcomeStore>,
    repository: Arc<StrategyRepository>,
    analyzer: PatternAnalyzer,
    adaptation: AdaptationEngine,
    learner: ReinforcementLearner,
    graph: Arc<KnowledgeGraph>,
    ab_tests: AbTestService,
    predictive: PredictiveScorer,
    scheduler: Arc<ConsolidationScheduler>,
    event_bus: EventBus,
    /// Draws for the random consolidation trigger, kept apart from selection
    trigger_rng: Mutex<StdRng>,
}

impl LearningEngine {
    pub fn new(store: Arc<dyn OutcomeStore>, config: EngineConfigSpec, collaborators: Collaborators) -> Self {
        let event_bus = EventBus::with_default_capacity();
        let repository = Arc::new(StrategyRepository::new(
            store.clone(),
            config.selection.merge_retry_limit,
        ));
        let graph = Arc::new(KnowledgeGraph::new(store.clone(), config.selection.clone()));
        let scheduler = Arc::new(ConsolidationScheduler::new(
            store.clone(),
            repository.clone(),
            graph.clone(),
            event_bus.clone(),
            config.consolidation.clone(),
            config.analysis.min_value_occurrences,
        ));
        let trigger_rng = match config.learning.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_os_rng(),
        };

        Self {
            analyzer: PatternAnalyzer::new(config.analysis.clone()),
            adaptation: AdaptationEngine::new(config.adaptation.clone(), collaborators.selector_discovery),
            learner: ReinforcementLearner::new(config.learning.clone(), store.clone()),
            graph,
            ab_tests: AbTestService::new(store.clone(), config.selection.clone()),
            predictive: PredictiveScorer::new(store.clone()),
            trigger_rng: Mutex::new(trigger_rng),
            config,
            store,
            repository,
            scheduler,
            event_bus,
        }
    }

    pub fn config(&self) -> &EngineConfigSpec {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn OutcomeStore> {
        &self.store
    }

    pub fn repository(&self) -> &Arc<StrategyRepository> {
        &self.repository
    }

    pub fn learner(&self) -> &ReinforcementLearner {
        &self.learner
    }

    pub fn knowledge_graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn predictive(&self) -> &PredictiveScorer {
        &self.predictive
    }

    pub fn scheduler(&self) -> &Arc<ConsolidationScheduler> {
        &self.scheduler
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Start the periodic consolidation loop
    pub fn start_background(&self) -> tokio::task::JoinHandle<()> {
        self.scheduler.clone().start()
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Pick the strategy to use for the next task on `key`. Always returns a
    /// usable strategy.
    pub async fn select_strategy(&self, domain: LearningDomain, key: &str, context: &TaskContext) -> Strategy {
        let timeout = self.config.selection.timeout();
        match tokio::time::timeout(timeout, self.try_select_strategy(domain, key, context)).await {
            Ok(Ok(strategy)) => strategy,
            Ok(Err(e)) => {
                warn!(domain = %domain, key, error = %e, "Strategy selection failed, using fallback");
                self.fallback(domain, key)
            }
            Err(_) => {
                warn!(
                    domain = %domain,
                    key,
                    timeout_ms = self.config.selection.timeout_ms,
                    "Strategy selection timed out, using fallback"
                );
                self.fallback(domain, key)
            }
        }
    }

    /// Selection without the timeout and fallback
    pub async fn try_select_strategy(
        &self,
        domain: LearningDomain,
        key: &str,
        context: &TaskContext,
    ) -> Result<Strategy, EngineError> {
        if let Err(e) = self.seed_by_transfer(domain, key, context).await {
            warn!(domain = %domain, key, error = %e, "Transfer lookup failed");
        }

        let candidates = self.repository.candidates(domain, key).await?;
        let (index, mode) = self
            .learner
            .select(&candidates)
            .ok_or_else(|| EngineError::NotFound(format!("strategy {}/{}", domain, key)))?;
        let chosen_id = candidates[index].id;

        let selected = self
            .repository
            .merge_strategy(chosen_id, |s| match mode {
                SelectionMode::Explore => s.exploration_count += 1,
                _ => s.exploitation_count += 1,
            })
            .await?;

        metrics::counter!("safla_selections_total", "domain" => domain.as_str(), "mode" => mode_label(mode))
            .increment(1);
        debug!(domain = %domain, key, strategy_id = %selected.id, ?mode, "Strategy selected");
        self.event_bus.publish(EngineEvent::StrategySelected {
            strategy_id: selected.id,
            domain,
            key: key.to_string(),
            mode,
            timestamp: Utc::now(),
        });
        Ok(selected)
    }

    fn fallback(&self, domain: LearningDomain, key: &str) -> Strategy {
        let strategy = self
            .repository
            .cached(domain, key)
            .unwrap_or_else(|| Strategy::default_for(domain, key));
        metrics::counter!("safla_selection_fallbacks_total", "domain" => domain.as_str()).increment(1);
        self.event_bus.publish(EngineEvent::StrategySelected {
            strategy_id: strategy.id,
            domain,
            key: key.to_string(),
            mode: SelectionMode::Fallback,
            timestamp: Utc::now(),
        });
        strategy
    }

    /// Cold start: seed a never-seen key from the most similar successful
    /// task's strategy
    async fn seed_by_transfer(
        &self,
        domain: LearningDomain,
        key: &str,
        context: &TaskContext,
    ) -> Result<Option<Strategy>, EngineError> {
        let Some(profile) = TaskProfile::from_context(domain, key, context) else {
            return Ok(None);
        };
        if self.store.get_strategy(domain, key).await?.is_some() {
            return Ok(None);
        }

        let transfer = self.graph.find_transfer_candidates(&profile).await?;
        let mut source = None;
        for candidate in &transfer.candidates {
            if let Some(strategy) = self.store.find_strategy(candidate.strategy_id).await? {
                if strategy.domain == domain {
                    source = Some((candidate, strategy));
                    break;
                }
            }
        }
        let Some((candidate, source)) = source else {
            return Ok(None);
        };

        let note = format!(
            "Transferred from task {} (similarity {:.2}, confidence {:.2})",
            candidate.task_id, candidate.similarity, transfer.confidence
        );
        let seeded = self
            .repository
            .get_or_create_with(domain, key, || {
                let mut strategy = Strategy::new(domain, key, source.parameters.clone());
                strategy.push_adaptation(
                    TriggerKind::TransferLearning,
                    vec![ParameterChange::new(
                        "source_strategy",
                        serde_json::Value::Null,
                        source.id.to_string(),
                    )],
                    Some(note.clone()),
                );
                strategy
            })
            .await?;

        info!(
            domain = %domain,
            key,
            source_key = %source.key,
            similarity = candidate.similarity,
            "Seeded new strategy by transfer"
        );
        metrics::counter!("safla_transfers_total", "domain" => domain.as_str()).increment(1);
        Ok(Some(seeded))
    }

    /// Register an additional candidate for `key`
    pub async fn register_variant(
        &self,
        domain: LearningDomain,
        key: &str,
        parameters: StrategyParameters,
    ) -> Result<Strategy, EngineError> {
        self.repository.put_variant(domain, key, parameters).await
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Fold one outcome into the engine. Validation errors and a failed
    /// append are returned. Once the event is stored the call succeeds:
    /// merge, Q-table, analysis and graph failures are logged, and a merge
    /// that gives up yields a receipt with `strategy_updated == false`.
    pub async fn record_outcome(&self, event: LearningEvent) -> Result<RecordReceipt, EngineError> {
        event.validate()?;

        let target = match event.strategy_id {
            Some(id) => {
                let strategy = self.repository.find(id).await?;
                if strategy.domain != event.domain || strategy.key != event.key {
                    return Err(EngineError::Validation(format!(
                        "strategy {} belongs to {}/{}, not {}/{}",
                        id, strategy.domain, strategy.key, event.domain, event.key
                    )));
                }
                strategy
            }
            None => self.repository.get(event.domain, &event.key).await?,
        };

        self.store.append(&event).await?;
        let success_label = if event.outcome.success { "true" } else { "false" };
        metrics::counter!(
            "safla_outcomes_recorded_total",
            "domain" => event.domain.as_str(),
            "success" => success_label
        )
        .increment(1);

        let reward = self.learner.derive_reward(&event);
        let state = StateKey::from_event(&event);
        let max_next_q = match self.learner.max_q(&state).await {
            Ok(q) => q,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Failed to read Q-table, bootstrapping from 0");
                0.0
            }
        };
        let latency_ms = event.outcome.latency_ms();
        let learning = &self.config.learning;
        let impact_min_samples = self.config.adaptation.impact_min_samples;

        let merged = self
            .repository
            .merge_if(event.domain, &event.key, Some(target.id), |s| {
                s.record_outcome(
                    event.outcome.success,
                    latency_ms,
                    learning.confidence_success_step,
                    learning.confidence_failure_step,
                );
                self.learner.update_strategy(s, reward, max_next_q);
                Some(s.resolve_pending_impacts(impact_min_samples))
            })
            .await;
        let (updated, resolved_impacts) = match merged {
            Ok(Some(merged)) => merged,
            Ok(None) => {
                let e = EngineError::NotFound(format!("strategy {}", target.id));
                return Ok(self.stored_without_merge(&event, &target, reward, &e));
            }
            Err(e) => return Ok(self.stored_without_merge(&event, &target, reward, &e)),
        };
        if let Err(e) = self.learner.update_state(&state, updated.id, 0.0, reward).await {
            warn!(event_id = %event.id, error = %e, "Failed to update Q-table");
        }

        for (trigger, impact) in &resolved_impacts {
            info!(strategy_id = %updated.id, %trigger, impact, "Adaptation impact measured");
        }

        let (strategy, applied) = match self.analyze_and_adapt(&event, updated.id).await {
            Ok(Some((strategy, applied))) => (strategy, applied),
            Ok(None) => (updated, Vec::new()),
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Pattern analysis failed");
                (updated, Vec::new())
            }
        };

        if let Err(e) = self.graph.observe(&event, strategy.id).await {
            warn!(event_id = %event.id, error = %e, "Failed to update knowledge graph");
        }

        self.event_bus.publish(EngineEvent::OutcomeRecorded {
            event_id: event.id,
            domain: event.domain,
            key: event.key.clone(),
            strategy_id: strategy.id,
            success: event.outcome.success,
            reward,
            q_value: strategy.q_value,
            timestamp: Utc::now(),
        });

        self.maybe_trigger_consolidation();

        Ok(RecordReceipt {
            event_id: event.id,
            strategy_id: strategy.id,
            reward,
            q_value: strategy.q_value,
            strategy_version: strategy.version,
            adaptations: applied.iter().map(|a| a.trigger).collect(),
            resolved_impacts,
            strategy_updated: true,
        })
    }

    /// Receipt for an event that is stored but whose strategy merge failed
    fn stored_without_merge(
        &self,
        event: &LearningEvent,
        target: &Strategy,
        reward: f64,
        error: &EngineError,
    ) -> RecordReceipt {
        warn!(
            event_id = %event.id,
            strategy_id = %target.id,
            error = %error,
            "Outcome stored but strategy not updated"
        );
        metrics::counter!("safla_merge_failures_total", "domain" => event.domain.as_str()).increment(1);
        RecordReceipt {
            event_id: event.id,
            strategy_id: target.id,
            reward,
            q_value: target.q_value,
            strategy_version: target.version,
            adaptations: Vec::new(),
            resolved_impacts: Vec::new(),
            strategy_updated: false,
        }
    }

    async fn analyze_and_adapt(
        &self,
        event: &LearningEvent,
        strategy_id: StrategyId,
    ) -> Result<Option<(Strategy, Vec<AppliedAdaptation>)>, EngineError> {
        let history = self
            .store
            .query(
                &EventQuery::for_domain(event.domain)
                    .key(&event.key)
                    .limit(self.config.analysis.window_size),
            )
            .await?;

        let insights = match self.analyzer.analyze(event, &history) {
            Ok(insights) => insights,
            Err(e) if e.is_no_op() => {
                debug!(domain = %event.domain, key = %event.key, "{}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if insights.is_empty() {
            return Ok(None);
        }

        let merged = self
            .repository
            .merge_if(event.domain, &event.key, Some(strategy_id), |s| {
                let applied = self.adaptation.apply_all(s, &insights);
                (!applied.is_empty()).then_some(applied)
            })
            .await?;
        let Some((strategy, applied)) = merged else {
            return Ok(None);
        };

        for adaptation in &applied {
            info!(
                strategy_id = %strategy.id,
                domain = %strategy.domain,
                key = %strategy.key,
                trigger = %adaptation.trigger,
                changes = adaptation.changes.len(),
                "Strategy adapted"
            );
            metrics::counter!(
                "safla_adaptations_total",
                "domain" => strategy.domain.as_str(),
                "trigger" => adaptation.trigger.as_str()
            )
            .increment(1);
            self.event_bus.publish(EngineEvent::StrategyAdapted {
                strategy_id: strategy.id,
                domain: strategy.domain,
                key: strategy.key.clone(),
                trigger: adaptation.trigger,
                version: strategy.version,
                changes: adaptation.changes.len(),
                timestamp: Utc::now(),
            });
        }

        // Outside the key lock; discovery may be slow
        self.adaptation.request_discovery(&event.key, &applied).await;
        Ok(Some((strategy, applied)))
    }

    fn maybe_trigger_consolidation(&self) {
        let config = &self.config.consolidation;
        if !config.enabled || config.random_trigger_probability <= 0.0 {
            return;
        }
        let draw: f64 = self.trigger_rng.lock().random();
        if draw >= config.random_trigger_probability {
            return;
        }

        debug!("Random consolidation trigger fired");
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            match scheduler.run_cycle().await {
                Ok(Some(report)) => debug!(?report, "Triggered consolidation finished"),
                Ok(None) => debug!("Consolidation already running, trigger skipped"),
                Err(e) => warn!("Triggered consolidation failed: {}", e),
            }
        });
    }

    /// Record without waiting for the pipeline; failures are logged
    pub fn spawn_record(self: &Arc<Self>, event: LearningEvent) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let event_id = event.id;
            if let Err(e) = engine.record_outcome(event).await {
                warn!(%event_id, error = %e, "Background outcome recording failed");
            }
        })
    }

    /// Record events in order. One failing event does not stop the rest.
    pub async fn record_batch(&self, events: Vec<LearningEvent>) -> Vec<Result<RecordReceipt, EngineError>> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            let event_id = event.id;
            let result = self.record_outcome(event).await;
            if let Err(e) = &result {
                warn!(%event_id, error = %e, "Batch event rejected");
            }
            results.push(result);
        }
        results
    }

    /// Select, execute through `executor`, and record the result. The action
    /// has already run when recording happens, so a recording failure is
    /// logged and leaves `receipt` empty instead of discarding the result.
    pub async fn run_task(
        &self,
        executor: &dyn ActionExecutor,
        actor_id: &str,
        domain: LearningDomain,
        key: &str,
        task_type: &str,
        context: TaskContext,
    ) -> TaskRun {
        let strategy = self.select_strategy(domain, key, &context).await;
        let started = Instant::now();
        let result = match executor.execute_action(&strategy).await {
            Ok(result) => result,
            Err(e) => {
                warn!(domain = %domain, key, error = %e, "Action executor failed");
                ActionResult::failed(
                    started.elapsed(),
                    ErrorDetails::new(ErrorKind::Other, e.to_string()),
                )
            }
        };

        let outcome = if result.success {
            Outcome::success()
        } else {
            Outcome::failure(
                result
                    .error_details
                    .clone()
                    .unwrap_or_else(|| ErrorDetails::new(ErrorKind::Other, "action failed")),
            )
        }
        .with_metric(LATENCY_METRIC, result.duration.as_secs_f64() * 1000.0);

        let mut event = LearningEvent::new(actor_id, domain, key, task_type, outcome);
        event.context = context;
        // A fallback strategy may never have been stored
        if self.store.find_strategy(strategy.id).await.ok().flatten().is_some() {
            event = event.with_strategy(strategy.id);
        }
        let event_id = event.id;
        let receipt = match self.record_outcome(event).await {
            Ok(receipt) => Some(receipt),
            Err(e) => {
                warn!(%event_id, domain = %domain, key, error = %e, "Task ran but its outcome was not recorded");
                None
            }
        };
        TaskRun {
            strategy_id: strategy.id,
            result,
            receipt,
        }
    }

    // ========================================================================
    // Recommendations and A/B tests
    // ========================================================================

    /// Ranked improvement suggestions for everything `actor_id` has worked on
    pub async fn get_improvement_recommendations(&self, actor_id: &str) -> Result<Vec<Recommendation>, EngineError> {
        let events = self
            .store
            .query(&EventQuery::for_actor(actor_id).limit(RECOMMENDATION_HISTORY))
            .await?;

        let mut by_key: BTreeMap<(LearningDomain, String), Vec<&LearningEvent>> = BTreeMap::new();
        for event in &events {
            let window = by_key.entry((event.domain, event.key.clone())).or_default();
            if window.len() < self.config.analysis.window_size {
                window.push(event);
            }
        }

        let mut found = Vec::new();
        for ((domain, key), window) in by_key {
            let strategy = self.store.get_strategy(domain, &key).await?;
            match self.analyzer.analyze_window(domain, &window) {
                Ok(insights) => found.extend(recommendations::from_insights(
                    domain,
                    &key,
                    strategy.as_ref().map(|s| s.id),
                    &insights,
                )),
                Err(e) if e.is_no_op() => debug!(domain = %domain, key = %key, "{}", e),
                Err(e) => return Err(e),
            }
            let knowledge = self
                .store
                .list_knowledge(Some(domain))
                .await?
                .into_iter()
                .filter(|k| k.key == key)
                .max_by_key(|k| k.created_at);
            if let Some(knowledge) = knowledge {
                found.extend(recommendations::from_knowledge(&knowledge, strategy.as_ref().map(|s| s.id)));
            }
            if let Some(strategy) = strategy {
                found.extend(recommendations::from_strategy_health(
                    &strategy,
                    self.config.consolidation.archive_confidence_threshold,
                ));
            }
        }
        Ok(recommendations::rank(found))
    }

    pub async fn create_ab_test(&self, a: StrategyId, b: StrategyId) -> Result<AbTest, EngineError> {
        self.ab_tests.create(a, b).await
    }

    pub async fn analyze_ab_test(&self, id: AbTestId) -> Result<AbTestAnalysis, EngineError> {
        let analyzed = self.ab_tests.analyze(id).await?;
        if analyzed.newly_concluded {
            if let (Some(winner), Some(winner_strategy_id)) = (analyzed.test.winner, analyzed.test.winner_id()) {
                metrics::counter!("safla_ab_tests_concluded_total", "domain" => analyzed.test.domain.as_str())
                    .increment(1);
                self.event_bus.publish(EngineEvent::AbTestConcluded {
                    test_id: analyzed.test.id,
                    winner,
                    winner_strategy_id,
                    confidence: analyzed.analysis.confidence,
                    timestamp: Utc::now(),
                });
            }
        }
        Ok(analyzed.analysis)
    }

    /// Run a consolidation cycle now. `Ok(None)` when one is already running.
    pub async fn consolidate(&self) -> Result<Option<ConsolidationReport>, EngineError> {
        self.scheduler.run_cycle().await
    }
}

fn mode_label(mode: SelectionMode) -> &'static str {
    match mode {
        SelectionMode::Explore => "explore",
        SelectionMode::Exploit => "exploit",
        SelectionMode::Fallback => "fallback",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::InMemoryOutcomeStore;

    fn engine() -> (Arc<InMemoryOutcomeStore>, LearningEngine) {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let mut config = EngineConfigSpec::default();
        config.learning.seed = Some(7);
        config.consolidation.random_trigger_probability = 0.0;
        let engine = LearningEngine::new(store.clone(), config, Collaborators::default());
        (store, engine)
    }

    #[tokio::test]
    async fn test_first_selection_creates_default() {
        let (store, engine) = engine();
        let mut events = engine.event_bus().subscribe();

        let strategy = engine
            .select_strategy(LearningDomain::PortalNavigation, "portal-1", &TaskContext::new())
            .await;
        let stored = store
            .get_strategy(LearningDomain::PortalNavigation, "portal-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, strategy.id);
        assert_eq!(stored.exploration_count + stored.exploitation_count, 1);

        match events.try_recv().unwrap() {
            EngineEvent::StrategySelected { strategy_id, mode, .. } => {
                assert_eq!(strategy_id, strategy.id);
                assert_ne!(mode, SelectionMode::Fallback);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_record_updates_strategy() {
        let (_, engine) = engine();
        let event = LearningEvent::new(
            "agent-1",
            LearningDomain::DocumentParsing,
            "rfp",
            "extract",
            Outcome::success().with_metric(LATENCY_METRIC, 120.0),
        );
        let receipt = engine.record_outcome(event).await.unwrap();
        assert_eq!(receipt.reward, 1.0);
        assert!(receipt.q_value > 0.0);
        assert!(receipt.adaptations.is_empty());

        let strategy = engine.repository().find(receipt.strategy_id).await.unwrap();
        assert_eq!(strategy.performance.sample_size, 1);
        assert_eq!(strategy.performance.success_rate, 1.0);
        assert_eq!(strategy.version, receipt.strategy_version);
    }

    #[tokio::test]
    async fn test_invalid_event_is_rejected_before_append() {
        let (store, engine) = engine();
        let event = LearningEvent::new(
            "",
            LearningDomain::DocumentParsing,
            "rfp",
            "extract",
            Outcome::success(),
        );
        let err = engine.record_outcome(event).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn test_strategy_from_other_key_is_rejected() {
        let (_, engine) = engine();
        let other = engine
            .repository()
            .get(LearningDomain::DocumentParsing, "other")
            .await
            .unwrap();
        let event = LearningEvent::new(
            "agent-1",
            LearningDomain::DocumentParsing,
            "rfp",
            "extract",
            Outcome::success(),
        )
        .with_strategy(other.id);
        let err = engine.record_outcome(event).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_recommendations_include_consolidated_knowledge() {
        use crate::domain::knowledge::{ConsolidatedKnowledge, FactorSummary};

        let (store, engine) = engine();
        engine
            .record_outcome(LearningEvent::new(
                "agent-1",
                LearningDomain::PortalNavigation,
                "portal-1",
                "scan",
                Outcome::success(),
            ))
            .await
            .unwrap();
        store
            .put_knowledge(&ConsolidatedKnowledge {
                id: uuid::Uuid::new_v4(),
                domain: LearningDomain::PortalNavigation,
                key: "portal-1".to_string(),
                event_count: 30,
                success_rate: 0.4,
                success_factors: Vec::new(),
                failure_factors: vec![FactorSummary {
                    field: "portal_type".to_string(),
                    value: "periscope".to_string(),
                    success_rate: 0.1,
                    lift: -0.3,
                    occurrences: 10,
                }],
                period_start: Utc::now(),
                period_end: Utc::now(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let found = engine.get_improvement_recommendations("agent-1").await.unwrap();
        let from_knowledge = found
            .iter()
            .find(|r| r.message.contains("periscope"))
            .expect("knowledge recommendation");
        assert_eq!(from_knowledge.key, "portal-1");
        assert!(from_knowledge.strategy_id.is_some());
        assert!(from_knowledge.rationale.iter().any(|r| r.contains("30 consolidated outcomes")));
    }
}
