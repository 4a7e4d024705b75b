// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process engine bootstrap
//!
//! Loads the configuration, opens the configured outcome store and builds a
//! [`LearningEngine`] for the command being run.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use safla_engine::application::engine::{Collaborators, LearningEngine};
use safla_engine::application::store_factory::create_outcome_store;
use safla_engine::domain::config::EngineConfigManifest;

pub struct EmbeddedEngine {
    pub manifest: EngineConfigManifest,
    pub engine: Arc<LearningEngine>,
}

impl EmbeddedEngine {
    pub async fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let manifest = EngineConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
        Self::from_manifest(manifest, Collaborators::default()).await
    }

    pub async fn from_manifest(manifest: EngineConfigManifest, collaborators: Collaborators) -> Result<Self> {
        manifest.validate().context("Configuration validation failed")?;

        let store = create_outcome_store(&manifest.spec.storage)
            .await
            .context("Failed to initialize outcome store")?;
        let engine = Arc::new(LearningEngine::new(store, manifest.spec.clone(), collaborators));
        info!(config = %manifest.metadata.name, "Learning engine initialized");

        Ok(Self { manifest, engine })
    }
}
