//! Configuration loading, validation, and profile lookup for tokenwise.
//!
//! Loads configuration from `~/.tokenwise/config.toml` with environment
//! variable overrides. Every agent type gets an [`AgentProfile`] bundling its
//! history, prompt, and RAG optimization options; unknown agent types fall
//! back to `default_profile`. All budgets are validated at load time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokenwise_core::options::{
    HistoryOptimizationOptions, PromptOptimizationOptions, RagOptimizationOptions,
};

/// The root configuration structure.
///
/// Maps directly to `~/.tokenwise/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default completion model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Policy constants for health evaluation, scoring and summarization
    #[serde(default)]
    pub optimization: OptimizationConfig,

    /// Profile used for agent types without their own entry
    #[serde(default)]
    pub default_profile: AgentProfile,

    /// Per-agent-type profiles, keyed by agent type name
    #[serde(default)]
    pub agents: HashMap<String, AgentProfile>,

    /// Tool chain execution settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Cost tracking configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_model() -> String {
    "openai/gpt-4o".into()
}

/// Optimization options for one agent type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    #[serde(default)]
    pub history: HistoryOptimizationOptions,

    #[serde(default)]
    pub prompt: PromptOptimizationOptions,

    #[serde(default)]
    pub rag: RagOptimizationOptions,
}

impl AgentProfile {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let wrap = |e: tokenwise_core::Error| {
            ConfigError::ValidationError(format!("profile '{name}': {e}"))
        };
        self.history.validate().map_err(wrap)?;
        self.prompt.validate().map_err(wrap)?;
        self.rag.validate().map_err(wrap)?;
        Ok(())
    }
}

/// Tunable policy constants. None of these are contractual; they are
/// heuristics exposed so deployments can calibrate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// History is flagged for optimization above this fraction of its budget
    #[serde(default = "default_health_threshold")]
    pub health_threshold: f64,

    /// Query words must be longer than this to count for relevance
    #[serde(default = "default_min_word_length")]
    pub min_word_length: usize,

    /// Weight of the title match fraction in relevance scores
    #[serde(default = "default_title_bonus")]
    pub title_bonus: f64,

    /// Messages per window when looking for topic switches
    #[serde(default = "default_topic_window")]
    pub topic_window: usize,

    /// Lexical overlap below which consecutive windows count as a topic switch
    #[serde(default = "default_topic_overlap_threshold")]
    pub topic_overlap_threshold: f64,

    /// Upper bound for a single summarization call
    #[serde(default = "default_summary_timeout_secs")]
    pub summary_timeout_secs: u64,

    /// Charge summarization tokens to the turn that triggered them
    #[serde(default)]
    pub count_summary_tokens: bool,
}

fn default_health_threshold() -> f64 {
    0.85
}
fn default_min_word_length() -> usize {
    3
}
fn default_title_bonus() -> f64 {
    0.15
}
fn default_topic_window() -> usize {
    2
}
fn default_topic_overlap_threshold() -> f64 {
    0.1
}
fn default_summary_timeout_secs() -> u64 {
    30
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            health_threshold: default_health_threshold(),
            min_word_length: default_min_word_length(),
            title_bonus: default_title_bonus(),
            topic_window: default_topic_window(),
            topic_overlap_threshold: default_topic_overlap_threshold(),
            summary_timeout_secs: default_summary_timeout_secs(),
            count_summary_tokens: false,
        }
    }
}

/// Tool chain execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Per-attempt timeout for a single tool invocation
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Attempts per step for transient failures (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// "continue" (attempt later steps after a failure) or "abort"
    #[serde(default = "default_failure_policy")]
    pub failure_policy: String,
}

fn default_step_timeout_secs() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    250
}
fn default_max_backoff_ms() -> u64 {
    5_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_failure_policy() -> String {
    "continue".into()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            failure_policy: default_failure_policy(),
        }
    }
}

/// Cost tracking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Whether turn metrics are recorded
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Records older than this may be purged by maintenance runs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Custom model pricing overrides (model name → pricing)
    #[serde(default)]
    pub custom_pricing: HashMap<String, PricingOverrideConfig>,
}

fn default_true() -> bool {
    true
}
fn default_retention_days() -> u32 {
    90
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: default_retention_days(),
            custom_pricing: HashMap::new(),
        }
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

impl AppConfig {
    /// Load configuration from the default path (~/.tokenwise/config.toml).
    ///
    /// `TOKENWISE_MODEL` overrides the default model.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(model) = std::env::var("TOKENWISE_MODEL") {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tokenwise")
    }

    /// The profile for an agent type, or the default profile.
    pub fn profile(&self, agent_type: &str) -> &AgentProfile {
        match self.agents.get(agent_type) {
            Some(profile) => profile,
            None => {
                tracing::debug!(agent_type, "No profile for agent type, using default");
                &self.default_profile
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let opt = &self.optimization;
        if !(opt.health_threshold > 0.0 && opt.health_threshold <= 1.0) {
            return Err(ConfigError::ValidationError(
                "optimization.health_threshold must be within (0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&opt.title_bonus) {
            return Err(ConfigError::ValidationError(
                "optimization.title_bonus must be within [0, 1]".into(),
            ));
        }
        if opt.topic_window == 0 {
            return Err(ConfigError::ValidationError(
                "optimization.topic_window must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&opt.topic_overlap_threshold) {
            return Err(ConfigError::ValidationError(
                "optimization.topic_overlap_threshold must be within [0, 1]".into(),
            ));
        }

        self.default_profile.validate("default")?;
        for (name, profile) in &self.agents {
            profile.validate(name)?;
        }

        let orch = &self.orchestrator;
        if orch.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_attempts must be at least 1".into(),
            ));
        }
        if orch.step_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.step_timeout_secs must be greater than 0".into(),
            ));
        }
        if orch.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        if !matches!(orch.failure_policy.as_str(), "continue" | "abort") {
            return Err(ConfigError::ValidationError(format!(
                "orchestrator.failure_policy must be \"continue\" or \"abort\", got \"{}\"",
                orch.failure_policy
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            optimization: OptimizationConfig::default(),
            default_profile: AgentProfile::default(),
            agents: HashMap::new(),
            orchestrator: OrchestratorConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
