// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Interfaces to the external collaborators the engine drives but never
//! implements: the browser/document/LLM executor and selector discovery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::event::ErrorDetails;
use crate::domain::strategy::Strategy;

/// Result reported by a collaborator after executing one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

impl ActionResult {
    pub fn succeeded(duration: Duration) -> Self {
        Self {
            success: true,
            duration,
            error_details: None,
        }
    }

    pub fn failed(duration: Duration, details: ErrorDetails) -> Self {
        Self {
            success: false,
            duration,
            error_details: Some(details),
        }
    }
}

/// Executes a task using the parameters of the selected strategy
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute_action(&self, strategy: &Strategy) -> anyhow::Result<ActionResult>;
}

/// Finds replacement selectors for a portal. The engine only requests
/// discovery; scraping happens on the collaborator's side.
#[async_trait]
pub trait SelectorDiscovery: Send + Sync {
    async fn request_replacements(&self, key: &str, selectors: &[String]) -> anyhow::Result<()>;
}

/// Discovery sink that only logs the request
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSelectorDiscovery;

#[async_trait]
impl SelectorDiscovery for NoopSelectorDiscovery {
    async fn request_replacements(&self, key: &str, selectors: &[String]) -> anyhow::Result<()> {
        tracing::debug!(key, ?selectors, "Selector discovery requested (no collaborator attached)");
        Ok(())
    }
}
