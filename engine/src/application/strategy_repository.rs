// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Strategy Repository - versioned access to strategies
//!
//! The only sanctioned way to mutate a [`Strategy`]. Writers to the same
//! `(domain, key)` are serialized by a per-key async mutex inside this process,
//! and every write is a compare-and-swap on `version` so concurrent writers in
//! other processes are detected and retried with a fresh read.
//!
//! Reads never take the lock.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Single-writer-per-key merge over the outcome store

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::error::{EngineError, StoreError};
use crate::domain::event::LearningDomain;
use crate::domain::repository::OutcomeStore;
use crate::domain::strategy::{Strategy, StrategyId, StrategyParameters};

type KeyId = (LearningDomain, String);

pub struct StrategyRepository {
    store: Arc<dyn OutcomeStore>,
    locks: DashMap<KeyId, Arc<Mutex<()>>>,
    /// Last strategy seen per key, served when the store is slow or down
    cache: DashMap<KeyId, Strategy>,
    retry_limit: u32,
}

impl StrategyRepository {
    pub fn new(store: Arc<dyn OutcomeStore>, retry_limit: u32) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            cache: DashMap::new(),
            retry_limit: retry_limit.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn OutcomeStore> {
        &self.store
    }

    fn key_lock(&self, domain: LearningDomain, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((domain, key.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Remember `strategy` as the most recent one for its key
    pub fn remember(&self, strategy: &Strategy) {
        self.cache
            .insert((strategy.domain, strategy.key.clone()), strategy.clone());
    }

    /// Most recently seen strategy for a key, without touching the store
    pub fn cached(&self, domain: LearningDomain, key: &str) -> Option<Strategy> {
        self.cache.get(&(domain, key.to_string())).map(|s| s.clone())
    }

    /// Primary strategy for a key, created with domain defaults if absent
    pub async fn get(&self, domain: LearningDomain, key: &str) -> Result<Strategy, EngineError> {
        self.get_or_create_with(domain, key, || Strategy::default_for(domain, key))
            .await
    }

    /// Primary strategy for a key, created by `init` if absent
    pub async fn get_or_create_with<F>(
        &self,
        domain: LearningDomain,
        key: &str,
        init: F,
    ) -> Result<Strategy, EngineError>
    where
        F: FnOnce() -> Strategy,
    {
        if let Some(existing) = self.store.get_strategy(domain, key).await? {
            self.remember(&existing);
            return Ok(existing);
        }

        let lock = self.key_lock(domain, key);
        let _guard = lock.lock().await;
        self.create_locked(domain, key, init).await
    }

    /// Creation path; the caller holds the key lock
    async fn create_locked<F>(&self, domain: LearningDomain, key: &str, init: F) -> Result<Strategy, EngineError>
    where
        F: FnOnce() -> Strategy,
    {
        // Another task may have created it while we waited for the lock
        if let Some(existing) = self.store.get_strategy(domain, key).await? {
            self.remember(&existing);
            return Ok(existing);
        }

        let strategy = init();
        match self.store.put_strategy_if_version(&strategy, None).await {
            Ok(()) => {
                info!(
                    domain = %domain,
                    key,
                    strategy_id = %strategy.id,
                    "Created strategy"
                );
                self.remember(&strategy);
                Ok(strategy)
            }
            Err(StoreError::VersionConflict { .. }) => {
                // Lost a creation race against another process
                self.store
                    .get_strategy(domain, key)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(format!("strategy {}/{}", domain, key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All non-archived variants for a key, oldest first. Creates the default
    /// primary when the key has never been seen.
    pub async fn candidates(&self, domain: LearningDomain, key: &str) -> Result<Vec<Strategy>, EngineError> {
        let active: Vec<Strategy> = self
            .store
            .find_strategies(domain, key)
            .await?
            .into_iter()
            .filter(|s| !s.archived)
            .collect();

        if active.is_empty() {
            return Ok(vec![self.get(domain, key).await?]);
        }
        Ok(active)
    }

    /// Register an additional candidate strategy for a key
    pub async fn put_variant(
        &self,
        domain: LearningDomain,
        key: &str,
        parameters: StrategyParameters,
    ) -> Result<Strategy, EngineError> {
        if parameters.domain() != domain {
            return Err(EngineError::Validation(format!(
                "parameters for {} cannot be used in {}",
                parameters.domain(),
                domain
            )));
        }

        // The primary must stay the oldest variant
        let primary = self.get(domain, key).await?;

        let mut variant = Strategy::new(domain, key, parameters);
        if variant.created_at <= primary.created_at {
            variant.created_at = primary.created_at + chrono::Duration::microseconds(1);
            variant.updated_at = variant.created_at;
        }
        self.store.put_strategy_if_version(&variant, None).await?;
        info!(domain = %domain, key, strategy_id = %variant.id, "Registered strategy variant");
        Ok(variant)
    }

    pub async fn find(&self, id: StrategyId) -> Result<Strategy, EngineError> {
        self.store
            .find_strategy(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("strategy {}", id)))
    }

    /// Apply `mutation` to the primary strategy of a key and persist it
    pub async fn merge<F>(&self, domain: LearningDomain, key: &str, mut mutation: F) -> Result<Strategy, EngineError>
    where
        F: FnMut(&mut Strategy),
    {
        let merged = self
            .merge_if(domain, key, None, |s| {
                mutation(s);
                Some(())
            })
            .await?;
        merged
            .map(|(strategy, _)| strategy)
            .ok_or_else(|| EngineError::NotFound(format!("strategy {}/{}", domain, key)))
    }

    /// Apply `mutation` to one specific variant and persist it
    pub async fn merge_strategy<F>(&self, id: StrategyId, mut mutation: F) -> Result<Strategy, EngineError>
    where
        F: FnMut(&mut Strategy),
    {
        let current = self.find(id).await?;
        let merged = self
            .merge_if(current.domain, &current.key, Some(id), |s| {
                mutation(s);
                Some(())
            })
            .await?;
        merged
            .map(|(strategy, _)| strategy)
            .ok_or_else(|| EngineError::NotFound(format!("strategy {}", id)))
    }

    /// Serialized read-modify-write.
    ///
    /// `mutation` runs against a fresh read on every attempt and returns
    /// `None` to abandon the write. On success the stored version is exactly
    /// one more than the version that was read. After `retry_limit` version
    /// conflicts the merge fails with [`EngineError::StaleStrategy`].
    pub async fn merge_if<F, R>(
        &self,
        domain: LearningDomain,
        key: &str,
        target: Option<StrategyId>,
        mut mutation: F,
    ) -> Result<Option<(Strategy, R)>, EngineError>
    where
        F: FnMut(&mut Strategy) -> Option<R>,
    {
        let lock = self.key_lock(domain, key);
        let _guard = lock.lock().await;

        for attempt in 1..=self.retry_limit {
            let current = match target {
                Some(id) => self.find(id).await?,
                None => {
                    self.create_locked(domain, key, || Strategy::default_for(domain, key))
                        .await?
                }
            };

            let expected = current.version;
            let mut next = current;
            let Some(result) = mutation(&mut next) else {
                debug!(domain = %domain, key, "Merge produced no change");
                return Ok(None);
            };
            next.version = expected + 1;
            next.updated_at = Utc::now();

            match self.store.put_strategy_if_version(&next, Some(expected)).await {
                Ok(()) => {
                    debug!(
                        domain = %domain,
                        key,
                        strategy_id = %next.id,
                        version = next.version,
                        "Merged strategy"
                    );
                    self.remember(&next);
                    return Ok(Some((next, result)));
                }
                Err(StoreError::VersionConflict { expected, found, .. }) => {
                    warn!(
                        domain = %domain,
                        key,
                        attempt,
                        ?expected,
                        ?found,
                        "Stale strategy version, retrying merge with fresh read"
                    );
                    metrics::counter!("safla_merge_conflicts_total", "domain" => domain.as_str()).increment(1);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EngineError::StaleStrategy {
            key: format!("{}/{}", domain, key),
            attempts: self.retry_limit,
        })
    }

    /// Soft-delete a variant
    pub async fn archive(&self, id: StrategyId) -> Result<Strategy, EngineError> {
        self.merge_strategy(id, |s| s.archived = true).await
    }

    /// Explicit replacement of a key's primary parameters; resets performance
    pub async fn replace(
        &self,
        domain: LearningDomain,
        key: &str,
        parameters: StrategyParameters,
    ) -> Result<Strategy, EngineError> {
        if parameters.domain() != domain {
            return Err(EngineError::Validation(format!(
                "parameters for {} cannot be used in {}",
                parameters.domain(),
                domain
            )));
        }
        self.merge(domain, key, |s| s.replace_parameters(parameters.clone()))
            .await
    }
}
