// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application layer: the learning engine facade and the services it
//! coordinates.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Use cases over the domain aggregates and the outcome store

pub mod ab_testing;
pub mod adaptation_engine;
pub mod consensus;
pub mod consolidation;
pub mod engine;
pub mod pattern_analyzer;
pub mod predictive;
pub mod recommendations;
pub mod reinforcement;
pub mod store_factory;
pub mod strategy_repository;
pub mod transfer;

pub use ab_testing::{two_proportion_z_test, AbTestService, AnalyzedTest};
pub use adaptation_engine::{AdaptationEngine, AppliedAdaptation};
pub use consensus::{majority_vote, weighted_vote, ConsensusResult};
pub use consolidation::{ConsolidationReport, ConsolidationScheduler};
pub use engine::{Collaborators, LearningEngine, RecordReceipt};
pub use pattern_analyzer::PatternAnalyzer;
pub use predictive::PredictiveScorer;
pub use recommendations::Recommendation;
pub use reinforcement::ReinforcementLearner;
pub use store_factory::create_outcome_store;
pub use strategy_repository::StrategyRepository;
pub use transfer::{KnowledgeGraph, TaskProfile, TransferResult};
