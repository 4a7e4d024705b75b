// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Consolidation Scheduler - background summarization and pruning
//!
//! Periodically turns raw learning events that fell out of the retention
//! window into [`ConsolidatedKnowledge`], prunes those events, forgets task
//! nodes of the knowledge graph that were not seen inside the same window, and
//! archives strategies that never earned confidence. Runs on a fixed interval and can
//! also be kicked by a recorded outcome; only one cycle runs at a time.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Time-decay of raw events into durable knowledge

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::pattern_analyzer::context_lifts;
use crate::application::strategy_repository::StrategyRepository;
use crate::application::transfer::KnowledgeGraph;
use crate::domain::config::ConsolidationConfig;
use crate::domain::error::EngineError;
use crate::domain::event::{LearningDomain, LearningEvent};
use crate::domain::events::EngineEvent;
use crate::domain::knowledge::ConsolidatedKnowledge;
use crate::domain::repository::{EventQuery, OutcomeStore};
use crate::infrastructure::event_bus::EventBus;

/// What one consolidation cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidationReport {
    pub knowledge_created: usize,
    pub events_pruned: u64,
    pub strategies_archived: usize,
    pub tasks_forgotten: u64,
    /// Keys skipped because of a persistence error
    pub failed_keys: usize,
    pub duration_ms: u64,
}

pub struct ConsolidationScheduler {
    store: Arc<dyn OutcomeStore>,
    repository: Arc<StrategyRepository>,
    graph: Arc<KnowledgeGraph>,
    event_bus: EventBus,
    config: ConsolidationConfig,
    /// Context values need this many occurrences to become a factor
    min_factor_occurrences: usize,
    running: Mutex<()>,
    shutdown_token: CancellationToken,
}

impl ConsolidationScheduler {
    pub fn new(
        store: Arc<dyn OutcomeStore>,
        repository: Arc<StrategyRepository>,
        graph: Arc<KnowledgeGraph>,
        event_bus: EventBus,
        config: ConsolidationConfig,
        min_factor_occurrences: usize,
    ) -> Self {
        Self {
            store,
            repository,
            graph,
            event_bus,
            config,
            min_factor_occurrences,
            running: Mutex::new(()),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the scheduler background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Consolidation scheduler is disabled");
            return;
        }

        info!(
            interval_secs = self.config.interval_secs,
            retention_days = self.config.retention_days,
            "Starting consolidation scheduler"
        );

        let mut tick = interval(self.config.interval());
        // The first tick completes immediately; skip it so startup stays cheap
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.run_cycle().await {
                        Ok(Some(report)) => debug!(?report, "Scheduled consolidation finished"),
                        Ok(None) => debug!("Consolidation already running, tick skipped"),
                        Err(e) => warn!("Consolidation cycle failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping consolidation scheduler");
                    break;
                }
            }
        }

        info!("Consolidation scheduler stopped");
    }

    /// Run one cycle now. `Ok(None)` when another cycle is in progress.
    pub async fn run_cycle(&self) -> Result<Option<ConsolidationReport>, EngineError> {
        self.consolidate_at(Utc::now()).await
    }

    /// Run one cycle as if the current time were `now`
    pub async fn consolidate_at(&self, now: DateTime<Utc>) -> Result<Option<ConsolidationReport>, EngineError> {
        let Ok(_guard) = self.running.try_lock() else {
            return Ok(None);
        };

        let started = std::time::Instant::now();
        let cutoff = now - self.config.retention();
        let mut report = ConsolidationReport::default();

        let stale = self.store.stale_event_counts(cutoff).await?;
        for entry in stale.iter().filter(|s| s.count >= self.config.min_stale_events) {
            match self.consolidate_key(entry.domain, &entry.key, cutoff).await {
                Ok(pruned) => {
                    report.knowledge_created += 1;
                    report.events_pruned += pruned;
                }
                Err(e) => {
                    report.failed_keys += 1;
                    warn!(
                        domain = %entry.domain,
                        key = %entry.key,
                        error = %e,
                        "Failed to consolidate key, skipping"
                    );
                }
            }
        }

        report.tasks_forgotten = match self.graph.forget_tasks_before(cutoff).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Failed to prune knowledge graph");
                0
            }
        };
        report.strategies_archived = self.archive_stale_strategies(now).await?;
        report.duration_ms = started.elapsed().as_millis() as u64;

        metrics::counter!("safla_consolidation_pruned_events_total").increment(report.events_pruned);
        metrics::counter!("safla_consolidation_cycles_total").increment(1);
        self.event_bus.publish(EngineEvent::ConsolidationCompleted {
            knowledge_created: report.knowledge_created,
            events_pruned: report.events_pruned,
            strategies_archived: report.strategies_archived,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });
        info!(
            knowledge_created = report.knowledge_created,
            events_pruned = report.events_pruned,
            strategies_archived = report.strategies_archived,
            tasks_forgotten = report.tasks_forgotten,
            "Consolidation cycle completed"
        );
        Ok(Some(report))
    }

    /// Summarize then prune one key's stale events. Knowledge is written
    /// before anything is deleted.
    async fn consolidate_key(&self, domain: LearningDomain, key: &str, cutoff: DateTime<Utc>) -> Result<u64, EngineError> {
        let events = self
            .store
            .query(&EventQuery::for_domain(domain).key(key).before(cutoff))
            .await?;
        if events.is_empty() {
            return Ok(0);
        }

        let knowledge = summarize(domain, key, &events, self.min_factor_occurrences, self.config.top_factors);
        self.store.put_knowledge(&knowledge).await?;
        let pruned = self.store.prune_events(domain, key, cutoff).await?;
        debug!(domain = %domain, key, pruned, "Consolidated stale events");
        Ok(pruned)
    }

    async fn archive_stale_strategies(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let mut archived = 0;
        for strategy in self.store.list_strategies(None).await? {
            if !strategy.should_archive(
                now,
                self.config.archive_confidence_threshold,
                self.config.archive_min_samples,
                self.config.min_observation(),
            ) {
                continue;
            }
            match self.repository.archive(strategy.id).await {
                Ok(archived_strategy) => {
                    archived += 1;
                    if let Err(e) = self.store.delete_q_values(strategy.id).await {
                        warn!(strategy_id = %strategy.id, error = %e, "Failed to drop Q-values of archived strategy");
                    }
                    info!(
                        strategy_id = %strategy.id,
                        domain = %strategy.domain,
                        key = %strategy.key,
                        confidence = strategy.confidence_score,
                        "Archived strategy"
                    );
                    self.event_bus.publish(EngineEvent::StrategyArchived {
                        strategy_id: archived_strategy.id,
                        domain: archived_strategy.domain,
                        key: archived_strategy.key.clone(),
                        confidence_score: archived_strategy.confidence_score,
                        sample_size: archived_strategy.performance.sample_size,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => warn!(strategy_id = %strategy.id, error = %e, "Failed to archive strategy"),
            }
        }
        Ok(archived)
    }
}

/// Knowledge record for a batch of events of one key
pub fn summarize(
    domain: LearningDomain,
    key: &str,
    events: &[LearningEvent],
    min_occurrences: usize,
    top_factors: usize,
) -> ConsolidatedKnowledge {
    let successes = events.iter().filter(|e| e.outcome.success).count();
    let lifts = context_lifts(events.iter(), min_occurrences);

    let success_factors = lifts.iter().filter(|f| f.lift > 0.0).take(top_factors).cloned().collect();
    let failure_factors = lifts
        .iter()
        .rev()
        .filter(|f| f.lift < 0.0)
        .take(top_factors)
        .cloned()
        .collect();

    let period_start = events.iter().map(|e| e.timestamp).min().unwrap_or_else(Utc::now);
    let period_end = events.iter().map(|e| e.timestamp).max().unwrap_or_else(Utc::now);

    ConsolidatedKnowledge {
        id: Uuid::new_v4(),
        domain,
        key: key.to_string(),
        event_count: events.len(),
        success_rate: if events.is_empty() {
            0.0
        } else {
            successes as f64 / events.len() as f64
        },
        success_factors,
        failure_factors,
        period_start,
        period_end,
        created_at: Utc::now(),
    }
}
