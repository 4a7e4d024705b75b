// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Engine Configuration Types
//
// Defines the configuration schema for the learning engine:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Q-learning and exploration parameters
// - Pattern analysis window and gates
// - Adaptation step sizes
// - Consolidation schedule and retention
// - Storage backend selection

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "safla.dev/v1";
pub const KIND: &str = "EngineConfig";

/// Top-level Kubernetes-style engine configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfigManifest {
    /// API version (must be "safla.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "EngineConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: EngineConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Engine configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfigSpec {
    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub adaptation: AdaptationConfig,

    #[serde(default)]
    pub consolidation: ConsolidationConfig,

    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Q-learning, reward and exploration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Alpha
    pub learning_rate: f64,
    /// Gamma
    pub discount_factor: f64,
    /// Epsilon for epsilon-greedy selection
    pub epsilon: f64,
    pub success_reward: f64,
    pub failure_reward: f64,
    /// Reward bonus per unit of a secondary outcome metric, applied only when
    /// the event carries no explicit reward
    pub metric_bonuses: BTreeMap<String, f64>,
    pub confidence_success_step: f64,
    pub confidence_failure_step: f64,
    /// Fixed RNG seed for reproducible exploration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.95,
            epsilon: 0.2,
            success_reward: 1.0,
            failure_reward: -0.5,
            metric_bonuses: BTreeMap::from([("quality_score".to_string(), 0.2)]),
            confidence_success_step: 0.02,
            confidence_failure_step: 0.03,
            seed: None,
        }
    }
}

/// Pattern analyzer window and detector thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub window_size: usize,
    /// Hard gate: fewer samples yield no insights
    pub min_samples: usize,
    pub top_k: usize,
    pub low_success_threshold: f64,
    /// Share of failures with one error kind needed to raise a detector
    pub error_share_threshold: f64,
    pub min_error_occurrences: usize,
    pub low_win_rate_threshold: f64,
    /// Win-rate detector fires only when the window holds more samples than this
    pub low_win_rate_min_samples: usize,
    /// Minimum absolute lift for a context value to become an insight
    pub min_lift: f64,
    pub min_value_occurrences: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            min_samples: 10,
            top_k: 5,
            low_success_threshold: 0.5,
            error_share_threshold: 0.3,
            min_error_occurrences: 3,
            low_win_rate_threshold: 0.3,
            low_win_rate_min_samples: 3,
            min_lift: 0.15,
            min_value_occurrences: 3,
        }
    }
}

/// Mutation step sizes used by the adaptation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    /// Outcomes that must accrue before the same trigger may fire again
    pub cooldown_samples: u64,
    /// Post-adaptation outcomes needed before an impact score is computed
    pub impact_min_samples: u64,
    pub low_success_multiplier_min: f64,
    pub low_success_multiplier_max: f64,
    pub timeout_multiplier_min: f64,
    pub timeout_multiplier_max: f64,
    pub degraded_selector_score: f64,
    /// Pricing margin reduction per low-win-rate adaptation
    pub margin_step: f64,
    pub margin_floor: f64,
    /// Upper bound for any wait-time parameter
    pub max_wait_ceiling_ms: u64,
    pub history_limit: usize,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            cooldown_samples: 10,
            impact_min_samples: 10,
            low_success_multiplier_min: 1.2,
            low_success_multiplier_max: 1.5,
            timeout_multiplier_min: 1.3,
            timeout_multiplier_max: 1.5,
            degraded_selector_score: 0.3,
            margin_step: 0.02,
            margin_floor: 0.05,
            max_wait_ceiling_ms: 60_000,
            history_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Rolling window for raw learning events
    pub retention_days: i64,
    /// Keys with fewer stale events are left alone
    pub min_stale_events: usize,
    pub archive_confidence_threshold: f64,
    pub archive_min_samples: u64,
    pub min_observation_days: i64,
    /// Chance that a recorded outcome kicks off a cycle
    pub random_trigger_probability: f64,
    /// Factors kept per direction in consolidated knowledge
    pub top_factors: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 24 * 60 * 60,
            retention_days: 30,
            min_stale_events: 10,
            archive_confidence_threshold: 0.4,
            archive_min_samples: 20,
            min_observation_days: 7,
            random_trigger_probability: 0.1,
            top_factors: 5,
        }
    }
}

impl ConsolidationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn min_observation(&self) -> chrono::Duration {
        chrono::Duration::days(self.min_observation_days)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Budget for `select_strategy` before falling back to the cache
    pub timeout_ms: u64,
    pub transfer_similarity_threshold: f64,
    pub transfer_top_k: usize,
    /// Samples each variant needs before an A/B test may be created
    pub ab_min_samples: u64,
    pub ab_significance_level: f64,
    /// Version-conflict retries for a strategy merge
    pub merge_retry_limit: u32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            transfer_similarity_threshold: 0.3,
            transfer_top_k: 3,
            ab_min_samples: 5,
            ab_significance_level: 0.05,
            merge_retry_limit: 3,
        }
    }
}

impl SelectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Outcome store backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    #[default]
    InMemory,
    Postgres {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    5
}

impl Default for EngineConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "safla-engine".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: EngineConfigSpec::default(),
        }
    }
}

impl EngineConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. SAFLA_CONFIG_PATH environment variable
    /// 2. ./safla-config.yaml (working directory)
    /// 3. ~/.safla/config.yaml (user home)
    /// 4. /etc/safla/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SAFLA_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./safla-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".safla").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/safla/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("SAFLA_EPSILON") {
            match val.parse::<f64>() {
                Ok(epsilon) => {
                    tracing::info!("Environment override: SAFLA_EPSILON={}", epsilon);
                    self.spec.learning.epsilon = epsilon;
                }
                Err(_) => tracing::warn!("Invalid value for SAFLA_EPSILON: '{}'. Ignoring.", val),
            }
        }

        if let Some(val) = lookup("SAFLA_RETENTION_DAYS") {
            match val.parse::<i64>() {
                Ok(days) => {
                    tracing::info!("Environment override: SAFLA_RETENTION_DAYS={}", days);
                    self.spec.consolidation.retention_days = days;
                }
                Err(_) => tracing::warn!("Invalid value for SAFLA_RETENTION_DAYS: '{}'. Ignoring.", val),
            }
        }

        if let Some(url) = lookup("SAFLA_DATABASE_URL") {
            tracing::info!("Environment override: SAFLA_DATABASE_URL (postgres backend)");
            let max_connections = match &self.spec.storage {
                StorageConfig::Postgres { max_connections, .. } => *max_connections,
                StorageConfig::InMemory => default_max_connections(),
            };
            self.spec.storage = StorageConfig::Postgres { url, max_connections };
        }

        if let Some(val) = lookup("SAFLA_CONSOLIDATION_ENABLED") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: SAFLA_CONSOLIDATION_ENABLED=true");
                    self.spec.consolidation.enabled = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: SAFLA_CONSOLIDATION_ENABLED=false");
                    self.spec.consolidation.enabled = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for SAFLA_CONSOLIDATION_ENABLED: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let learning = &self.spec.learning;
        if !(learning.learning_rate > 0.0 && learning.learning_rate <= 1.0) {
            anyhow::bail!("spec.learning.learning_rate must be in (0, 1], got {}", learning.learning_rate);
        }
        if !(0.0..=1.0).contains(&learning.discount_factor) {
            anyhow::bail!("spec.learning.discount_factor must be in [0, 1], got {}", learning.discount_factor);
        }
        if !(0.0..=1.0).contains(&learning.epsilon) {
            anyhow::bail!("spec.learning.epsilon must be in [0, 1], got {}", learning.epsilon);
        }

        let analysis = &self.spec.analysis;
        if analysis.min_samples == 0 {
            anyhow::bail!("spec.analysis.min_samples must be at least 1");
        }
        if analysis.window_size < analysis.min_samples {
            anyhow::bail!(
                "spec.analysis.window_size ({}) must not be smaller than min_samples ({})",
                analysis.window_size,
                analysis.min_samples
            );
        }
        if analysis.top_k == 0 {
            anyhow::bail!("spec.analysis.top_k must be at least 1");
        }

        let adaptation = &self.spec.adaptation;
        for (name, min, max) in [
            ("low_success", adaptation.low_success_multiplier_min, adaptation.low_success_multiplier_max),
            ("timeout", adaptation.timeout_multiplier_min, adaptation.timeout_multiplier_max),
        ] {
            if min < 1.0 || min > max {
                anyhow::bail!("spec.adaptation.{}_multiplier range [{}, {}] is invalid", name, min, max);
            }
        }
        if !(0.0..1.0).contains(&adaptation.margin_floor) {
            anyhow::bail!("spec.adaptation.margin_floor must be in [0, 1), got {}", adaptation.margin_floor);
        }

        let consolidation = &self.spec.consolidation;
        if consolidation.retention_days < 1 {
            anyhow::bail!("spec.consolidation.retention_days must be at least 1");
        }
        if consolidation.interval_secs == 0 {
            anyhow::bail!("spec.consolidation.interval_secs must be positive");
        }
        if !(0.0..=1.0).contains(&consolidation.random_trigger_probability) {
            anyhow::bail!("spec.consolidation.random_trigger_probability must be in [0, 1]");
        }

        let selection = &self.spec.selection;
        if selection.timeout_ms == 0 {
            anyhow::bail!("spec.selection.timeout_ms must be positive");
        }
        if !(0.0..=1.0).contains(&selection.transfer_similarity_threshold) {
            anyhow::bail!("spec.selection.transfer_similarity_threshold must be in [0, 1]");
        }
        if selection.merge_retry_limit == 0 {
            anyhow::bail!("spec.selection.merge_retry_limit must be at least 1");
        }

        if let StorageConfig::Postgres { url, max_connections } = &self.spec.storage {
            if url.is_empty() {
                anyhow::bail!("spec.storage.url cannot be empty for the postgres backend");
            }
            if *max_connections == 0 {
                anyhow::bail!("spec.storage.max_connections must be at least 1");
            }
        }

        Ok(())
    }
}
