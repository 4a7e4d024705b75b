// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests for outcome recording: performance bookkeeping, merge
//! serialization, batch isolation, adaptation and persistence faults.

mod common;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

use common::{engine_with, failure, success, test_config, FlakyStore, RecordingDiscovery, SucceedingExecutor};
use safla_engine::application::engine::{Collaborators, LearningEngine};
use safla_engine::domain::strategy::{ParsingParams, ValidationStatus};
use safla_engine::infrastructure::memory_store::InMemoryOutcomeStore;
use safla_engine::{
    EngineError, EngineEvent, ErrorDetails, ErrorKind, LearningDomain, LearningEvent, Outcome, OutcomeStore, StateKey,
    StrategyParameters, TaskContext, TriggerKind, TASK_ID_FIELD,
};

#[tokio::test]
async fn test_success_rate_tracks_recorded_outcomes() {
    for seed in [42u64, 7, 1234, 99_999] {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let engine = engine_with(store.clone(), test_config(seed));
        let mut rng = StdRng::seed_from_u64(seed);

        let mut wins = 0u64;
        for recorded in 1..=40u64 {
            let event = if rng.random::<f64>() < 0.7 {
                wins += 1;
                success(LearningDomain::ProposalGeneration, "agency-a")
            } else {
                failure(LearningDomain::ProposalGeneration, "agency-a", ErrorKind::Other)
            };
            let receipt = engine.record_outcome(event).await.unwrap();
            assert!(receipt.strategy_updated);

            let strategy = engine.repository().find(receipt.strategy_id).await.unwrap();
            let performance = &strategy.performance;
            assert_eq!(performance.sample_size, recorded, "seed {}", seed);
            assert_eq!(performance.wins, wins, "seed {}", seed);
            assert!(
                (performance.success_rate - wins as f64 / recorded as f64).abs() < 1e-9,
                "seed {} after {} outcomes: {} != {}/{}",
                seed,
                recorded,
                performance.success_rate,
                wins,
                recorded
            );
            assert!((0.0..=1.0).contains(&strategy.confidence_score));
        }
    }
}

#[tokio::test]
async fn test_concurrent_records_are_serialized() {
    let store = Arc::new(InMemoryOutcomeStore::new());
    let engine = Arc::new(engine_with(store.clone(), test_config(3)));

    let tasks = (0..20).map(|_| {
        let engine = engine.clone();
        async move {
            engine
                .record_outcome(success(LearningDomain::DocumentParsing, "rfp-pdf"))
                .await
        }
    });
    for result in join_all(tasks).await {
        result.unwrap();
    }

    let strategy = store
        .get_strategy(LearningDomain::DocumentParsing, "rfp-pdf")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(strategy.performance.sample_size, 20);
    assert_eq!(store.event_count().await, 20);
}

#[tokio::test]
async fn test_batch_isolates_invalid_events() {
    let store = Arc::new(InMemoryOutcomeStore::new());
    let engine = engine_with(store.clone(), test_config(5));

    let invalid = LearningEvent::new(
        "agent-1",
        LearningDomain::DocumentParsing,
        "rfp-pdf",
        "task",
        Outcome::success().with_metric("quality_score", f64::NAN),
    );
    let results = engine
        .record_batch(vec![
            success(LearningDomain::DocumentParsing, "rfp-pdf"),
            invalid,
            success(LearningDomain::DocumentParsing, "rfp-pdf"),
        ])
        .await;

    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(EngineError::Validation(_))));
    assert!(results[2].is_ok());
    assert_eq!(store.event_count().await, 2);
}

#[tokio::test]
async fn test_no_adaptation_below_minimum_window() {
    let store = Arc::new(InMemoryOutcomeStore::new());
    let engine = engine_with(store.clone(), test_config(9));

    for _ in 0..9 {
        let receipt = engine
            .record_outcome(failure(LearningDomain::DocumentParsing, "rfp-pdf", ErrorKind::Timeout))
            .await
            .unwrap();
        assert!(receipt.adaptations.is_empty());
    }

    let receipt = engine
        .record_outcome(failure(LearningDomain::DocumentParsing, "rfp-pdf", ErrorKind::Timeout))
        .await
        .unwrap();
    assert!(receipt.adaptations.contains(&TriggerKind::LowSuccessRate));
    assert!(receipt.adaptations.contains(&TriggerKind::TimeoutPattern));

    let strategy = store
        .get_strategy(LearningDomain::DocumentParsing, "rfp-pdf")
        .await
        .unwrap()
        .unwrap();
    let StrategyParameters::Parsing(params) = &strategy.parameters else {
        panic!("expected parsing parameters");
    };
    assert!(params.timeout_ms > ParsingParams::default().timeout_ms);
    assert_eq!(strategy.adaptation_history.len(), 2);

    // Cooldown: the very next failure changes nothing
    let receipt = engine
        .record_outcome(failure(LearningDomain::DocumentParsing, "rfp-pdf", ErrorKind::Timeout))
        .await
        .unwrap();
    assert!(receipt.adaptations.is_empty());
}

#[tokio::test]
async fn test_selector_failures_request_discovery() {
    let store = Arc::new(InMemoryOutcomeStore::new());
    let discovery = Arc::new(RecordingDiscovery::default());
    let engine = LearningEngine::new(
        store.clone(),
        test_config(1),
        Collaborators {
            selector_discovery: discovery.clone(),
        },
    );
    let mut events = engine.event_bus().subscribe();

    for i in 0..10 {
        let event = if i % 2 == 0 {
            success(LearningDomain::PortalNavigation, "sam-gov")
        } else {
            LearningEvent::new(
                "agent-1",
                LearningDomain::PortalNavigation,
                "sam-gov",
                "search",
                Outcome::failure(
                    ErrorDetails::new(ErrorKind::SelectorNotFound, "no match").with_subject("results_table"),
                ),
            )
        };
        engine.record_outcome(event).await.unwrap();
    }

    let calls = discovery.calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "sam-gov");
    assert_eq!(calls[0].1, vec!["results_table".to_string()]);

    let strategy = store
        .get_strategy(LearningDomain::PortalNavigation, "sam-gov")
        .await
        .unwrap()
        .unwrap();
    let StrategyParameters::Navigation(params) = &strategy.parameters else {
        panic!("expected navigation parameters");
    };
    assert!(params.selectors["results_table"].needs_replacement);

    let mut adapted = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::StrategyAdapted { trigger, .. } = event {
            adapted |= trigger == TriggerKind::SelectorFailure;
        }
    }
    assert!(adapted);
}

#[tokio::test]
async fn test_validation_failures_mark_strategy_for_review() {
    let store = Arc::new(InMemoryOutcomeStore::new());
    let engine = engine_with(store.clone(), test_config(2));

    for i in 0..10 {
        let event = if i < 6 {
            success(LearningDomain::DocumentParsing, "sow")
        } else {
            failure(LearningDomain::DocumentParsing, "sow", ErrorKind::Validation)
        };
        engine.record_outcome(event).await.unwrap();
    }

    let strategy = store
        .get_strategy(LearningDomain::DocumentParsing, "sow")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(strategy.validation_status, ValidationStatus::NeedsValidation);
}

#[tokio::test]
async fn test_append_failure_is_surfaced() {
    let store = Arc::new(FlakyStore::new());
    let engine = engine_with(store.clone(), test_config(4));
    store.fail_appends(true);

    let err = engine
        .record_outcome(success(LearningDomain::PortalNavigation, "portal-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Persistence(_)));
    assert_eq!(store.event_count().await, 0);
}

#[tokio::test]
async fn test_merge_retries_version_conflicts() {
    let store = Arc::new(FlakyStore::new());
    let engine = engine_with(store.clone(), test_config(4));

    store.inject_conflicts(2);
    let receipt = engine
        .record_outcome(success(LearningDomain::PortalNavigation, "portal-1"))
        .await
        .unwrap();
    assert!(receipt.strategy_updated);
    let strategy = engine.repository().find(receipt.strategy_id).await.unwrap();
    assert_eq!(strategy.performance.sample_size, 1);
}

#[tokio::test]
async fn test_exhausted_merge_keeps_event_without_double_counting() {
    let store = Arc::new(FlakyStore::new());
    let engine = engine_with(store.clone(), test_config(4));
    engine
        .record_outcome(success(LearningDomain::PortalNavigation, "portal-1"))
        .await
        .unwrap();

    store.inject_conflicts(10);
    let receipt = engine
        .record_outcome(success(LearningDomain::PortalNavigation, "portal-1"))
        .await
        .unwrap();
    assert!(!receipt.strategy_updated);
    assert!(receipt.adaptations.is_empty());
    assert_eq!(store.event_count().await, 2);

    let strategy = engine.repository().find(receipt.strategy_id).await.unwrap();
    assert_eq!(strategy.performance.sample_size, 1);
    assert_eq!(receipt.strategy_version, strategy.version);

    // Conflicts cleared: the next outcome is counted normally and nothing
    // was appended twice
    store.inject_conflicts(0);
    let receipt = engine
        .record_outcome(success(LearningDomain::PortalNavigation, "portal-1"))
        .await
        .unwrap();
    assert!(receipt.strategy_updated);
    assert_eq!(store.event_count().await, 3);
}

#[tokio::test]
async fn test_run_task_keeps_result_when_recording_fails() {
    let store = Arc::new(FlakyStore::new());
    let engine = engine_with(store.clone(), test_config(6));
    let executor = SucceedingExecutor {
        duration: Duration::from_millis(25),
    };

    let run = engine
        .run_task(
            &executor,
            "agent-1",
            LearningDomain::DocumentParsing,
            "rfp-pdf",
            "extract",
            TaskContext::new(),
        )
        .await;
    let receipt = run.receipt.expect("recorded while the store is healthy");
    assert_eq!(receipt.strategy_id, run.strategy_id);

    store.fail_appends(true);
    let run = engine
        .run_task(
            &executor,
            "agent-1",
            LearningDomain::DocumentParsing,
            "rfp-pdf",
            "extract",
            TaskContext::new(),
        )
        .await;
    assert!(run.result.success);
    assert_eq!(run.result.duration, Duration::from_millis(25));
    assert!(run.receipt.is_none());
    assert_eq!(store.event_count().await, 1);
}

#[tokio::test]
async fn test_q_table_is_shared_across_tasks_and_engines() {
    let store = Arc::new(InMemoryOutcomeStore::new());
    let engine = engine_with(store.clone(), test_config(8));

    for i in 0..500 {
        let event = success(LearningDomain::ProposalGeneration, "agency-a")
            .with_context(TASK_ID_FIELD, format!("rfp-{}", i))
            .with_context("agency_tier", "federal");
        engine.record_outcome(event).await.unwrap();
    }
    assert_eq!(store.q_state_count().await, 1);

    let next_task = success(LearningDomain::ProposalGeneration, "agency-a")
        .with_context(TASK_ID_FIELD, "rfp-next")
        .with_context("agency_tier", "federal");
    let state = StateKey::from_event(&next_task);
    let learned = engine.learner().max_q(&state).await.unwrap();
    assert!(learned > 1.0);

    let restarted = engine_with(store.clone(), test_config(9));
    assert_eq!(restarted.learner().max_q(&state).await.unwrap(), learned);
}
