// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: learning events, strategies, insights, knowledge graph
//! entities and the outcome store contract.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Aggregates and persistence contracts for the learning engine

pub mod ab_test;
pub mod collaborator;
pub mod config;
pub mod error;
pub mod event;
pub mod events;
pub mod graph;
pub mod insight;
pub mod knowledge;
pub mod learning_state;
pub mod prediction;
pub mod repository;
pub mod strategy;

pub use ab_test::{AbTest, AbTestAnalysis, AbTestId, AbTestStatus, AbVariant};
pub use collaborator::{ActionExecutor, ActionResult, NoopSelectorDiscovery, SelectorDiscovery};
pub use config::{EngineConfigManifest, EngineConfigSpec, StorageConfig};
pub use error::{EngineError, StoreError};
pub use event::{
    ContextValue, ErrorDetails, ErrorKind, EventId, LearningDomain, LearningEvent, Outcome, TaskContext,
    CATEGORY_FIELD, LATENCY_METRIC, REQUIREMENTS_FIELD, TASK_ID_FIELD,
};
pub use events::{EngineEvent, SelectionMode};
pub use insight::{Insight, TriggerKind};
pub use knowledge::{ConsolidatedKnowledge, FactorSummary};
pub use learning_state::{QUpdate, StateKey};
pub use repository::{EventQuery, OutcomeStore};
pub use strategy::{Strategy, StrategyId, StrategyParameters};
