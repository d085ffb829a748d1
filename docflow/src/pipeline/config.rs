//! Declarative pipeline and stage configuration.

use super::retry::RetryConfig;
use crate::core::{ExecutionMode, StageKind};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Declarative description of one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage name within the pipeline.
    pub name: String,

    /// The kind of stage.
    #[serde(default)]
    pub kind: StageKind,

    /// Registry reference for the stage's behavior. Required for processor,
    /// validator, and router stages; optional for aggregators (the default
    /// merge keys outputs by dependency name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor: Option<String>,

    /// Names of stages this stage depends on.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Whether a terminal failure of this stage aborts the run.
    #[serde(default)]
    pub critical: bool,

    /// Bounded re-attempt count after a transient failure.
    #[serde(default)]
    pub retries: u32,

    /// Per-attempt deadline in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Relative CPU/memory weight used as the admission-control hint.
    #[serde(default = "default_resource_weight")]
    pub resource_weight: f64,

    /// Preferred execution backend.
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Run this stage even after a critical failure elsewhere
    /// (cleanup/aggregation stages).
    #[serde(default)]
    pub always_run: bool,
}

fn default_resource_weight() -> f64 {
    1.0
}

impl StageConfig {
    /// Creates a processor stage config.
    #[must_use]
    pub fn processor(name: impl Into<String>, processor: impl Into<String>) -> Self {
        Self::new(name, StageKind::Processor, Some(processor.into()))
    }

    /// Creates a validator stage config.
    #[must_use]
    pub fn validator(name: impl Into<String>, validator: impl Into<String>) -> Self {
        Self::new(name, StageKind::Validator, Some(validator.into()))
    }

    /// Creates a router stage config.
    #[must_use]
    pub fn router(name: impl Into<String>, router: impl Into<String>) -> Self {
        Self::new(name, StageKind::Router, Some(router.into()))
    }

    /// Creates an aggregator stage config with the default merge.
    #[must_use]
    pub fn aggregator(name: impl Into<String>) -> Self {
        Self::new(name, StageKind::Aggregator, None)
    }

    fn new(name: impl Into<String>, kind: StageKind, processor: Option<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            processor,
            depends_on: Vec::new(),
            critical: false,
            retries: 0,
            timeout_ms: None,
            resource_weight: 1.0,
            execution_mode: ExecutionMode::Async,
            always_run: false,
        }
    }

    /// Adds dependencies.
    #[must_use]
    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Marks the stage critical.
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Sets the retry limit.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Sets the resource weight hint.
    #[must_use]
    pub fn with_resource_weight(mut self, weight: f64) -> Self {
        self.resource_weight = weight;
        self
    }

    /// Sets the execution mode.
    #[must_use]
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Marks the stage to run even after a critical failure elsewhere.
    #[must_use]
    pub fn always_run(mut self) -> Self {
        self.always_run = true;
        self
    }

    /// Returns the per-attempt timeout as a duration, if configured.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Declarative description of a whole pipeline.
///
/// Loaded once and reused across many runs; the executable graph built from
/// it is cached per pipeline name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// The pipeline name.
    pub name: String,

    /// Stage declarations, in declaration order.
    pub stages: Vec<StageConfig>,

    /// Whether checkpoints are written after each wave.
    #[serde(default = "default_true")]
    pub checkpoint_enabled: bool,

    /// Whether a checkpoint write failure fails the run (instead of being
    /// logged best-effort).
    #[serde(default)]
    pub checkpoint_mandatory: bool,

    /// Retry timing defaults applied to every stage.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_true() -> bool {
    true
}

impl PipelineConfig {
    /// Creates a config with no stages.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidName`] for an empty or whitespace name.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidName {
                message: "Pipeline name cannot be empty or whitespace-only".to_string(),
            });
        }
        Ok(Self {
            name,
            stages: Vec::new(),
            checkpoint_enabled: true,
            checkpoint_mandatory: false,
            retry: RetryConfig::default(),
        })
    }

    /// Appends a stage declaration.
    #[must_use]
    pub fn with_stage(mut self, stage: StageConfig) -> Self {
        self.stages.push(stage);
        self
    }

    /// Disables per-wave checkpointing.
    #[must_use]
    pub fn without_checkpoints(mut self) -> Self {
        self.checkpoint_enabled = false;
        self
    }

    /// Makes checkpoint write failures fail the run.
    #[must_use]
    pub fn with_mandatory_checkpoints(mut self) -> Self {
        self.checkpoint_enabled = true;
        self.checkpoint_mandatory = true;
        self
    }

    /// Sets the retry timing defaults.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Parses a config from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidName`] for malformed documents.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidName {
            message: format!("Invalid pipeline configuration: {e}"),
        })
    }

    /// Looks up a stage declaration by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name == name)
    }
}
