// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Engine Error Taxonomy
//!
//! | Variant | Meaning | Handling |
//! |---------|---------|----------|
//! | `InsufficientData` | Sample size below a hard gate | No-op signal, never a failure |
//! | `Persistence` | Outcome store unreachable or rejected a write | Logged, cycle skipped |
//! | `StaleStrategy` | Version mismatch on merge | Retried with a fresh read |
//! | `Validation` | Malformed `LearningEvent` | Surfaced synchronously to the caller |
//!
//! `StoreError` is the persistence-side error returned by every
//! [`OutcomeStore`](crate::domain::repository::OutcomeStore) implementation.

use thiserror::Error;

/// Errors raised by outcome store implementations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {id}: expected {expected:?}, found {found:?}")]
    VersionConflict {
        id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Errors surfaced by the learning engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Insufficient data: {available} samples available, {required} required")]
    InsufficientData { required: usize, available: usize },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("Stale strategy {key}: gave up after {attempts} version conflicts")]
    StaleStrategy { key: String, attempts: u32 },

    #[error("Invalid learning event: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl EngineError {
    /// `InsufficientData` is a signal, not a failure
    pub fn is_no_op(&self) -> bool {
        matches!(self, EngineError::InsufficientData { .. })
    }
}
