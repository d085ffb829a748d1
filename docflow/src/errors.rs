//! Error types for the docflow orchestrator.
//!
//! The taxonomy separates build-time configuration errors (which can never
//! occur during a run) from stage-level errors (captured into results, never
//! propagated across the orchestrator boundary) and infrastructure errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The main error type for docflow operations.
#[derive(Debug, Error)]
pub enum DocflowError {
    /// A pipeline configuration error occurred at graph-build time.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A stage-level error escaped capture (orchestrator bug if seen by callers).
    #[error("{0}")]
    Stage(#[from] StageError),

    /// A worker pool error.
    #[error("{0}")]
    Pool(#[from] PoolError),

    /// A resource admission error.
    #[error("{0}")]
    Resource(#[from] ResourceError),

    /// A checkpoint persistence error.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// The requested run is unknown to this manager.
    #[error("Unknown run: {0}")]
    UnknownRun(Uuid),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for DocflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised while validating a pipeline configuration into a graph.
///
/// Configuration errors are fatal at build time and can never surface
/// during a run: the graph is immutable once built.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// A dependency cycle exists among the declared stages.
    #[error("Dependency cycle in pipeline '{pipeline}': {}", path.join(" -> "))]
    Cycle {
        /// The pipeline name.
        pipeline: String,
        /// The path of stages forming the cycle, first stage repeated last.
        path: Vec<String>,
    },

    /// A stage depends on a name that no declared stage carries.
    #[error("Stage '{stage}' depends on undeclared stage '{dependency}'")]
    UnknownDependency {
        /// The dependent stage.
        stage: String,
        /// The missing dependency name.
        dependency: String,
    },

    /// Two stages share a name.
    #[error("Duplicate stage name '{name}'")]
    DuplicateStage {
        /// The duplicated name.
        name: String,
    },

    /// A processor stage references a name absent from the registry.
    #[error("Stage '{stage}' references unregistered processor '{processor}'")]
    UnknownProcessor {
        /// The stage carrying the reference.
        stage: String,
        /// The unresolved processor name.
        processor: String,
    },

    /// The configuration declares no stages.
    #[error("Pipeline '{pipeline}' declares no stages")]
    Empty {
        /// The pipeline name.
        pipeline: String,
    },

    /// The pipeline or a stage name is empty or whitespace-only.
    #[error("{message}")]
    InvalidName {
        /// What was wrong with the name.
        message: String,
    },
}

/// Error raised by a stage attempt.
///
/// Stage errors are captured into the attempt's `StageResult`; whether the
/// orchestrator re-attempts the stage is decided by [`StageError::is_transient`].
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum StageError {
    /// The processor or validator raised during execution.
    #[error("Stage execution failed: {message}")]
    Execution {
        /// Human-readable failure description.
        message: String,
        /// Whether a re-attempt may succeed.
        transient: bool,
    },

    /// The attempt exceeded its configured deadline.
    #[error("Stage timed out after {timeout_ms} ms")]
    Timeout {
        /// The per-attempt deadline in milliseconds.
        timeout_ms: u64,
    },

    /// A validator reported failing checks.
    #[error("Validation failed: {}", issues.join("; "))]
    Validation {
        /// The structured issue list.
        issues: Vec<String>,
    },

    /// The attempt was cancelled before reaching a result.
    #[error("Stage cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },
}

impl StageError {
    /// Creates a transient execution error (retryable per policy).
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            transient: true,
        }
    }

    /// Creates a non-transient execution error (fails the stage immediately).
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            transient: false,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Returns whether the retry policy may re-attempt after this error.
    ///
    /// Timeouts are a retryable variant of execution failure. Validation
    /// failures and cancellations are never retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Execution { transient, .. } => *transient,
            Self::Timeout { .. } => true,
            Self::Validation { .. } | Self::Cancelled { .. } => false,
        }
    }
}

/// Errors raised by the worker pool.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The bounded work queue is full and the pool is configured to reject.
    #[error("Work queue full (capacity {capacity})")]
    QueueFull {
        /// The configured queue capacity.
        capacity: usize,
    },

    /// The pool has been shut down.
    #[error("Worker pool is closed")]
    Closed,
}

/// Errors raised by resource admission control.
///
/// Exhaustion is backpressure, not failure: the orchestrator defers
/// admission and re-polls rather than dropping work.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    /// Current utilization plus the requested weight exceeds the limits.
    #[error("Resources exhausted: weight {requested:.2} refused at {active} active workers")]
    Exhausted {
        /// The weight that was refused.
        requested: f64,
        /// Workers active at refusal time.
        active: usize,
    },
}

/// Error raised while persisting or loading a checkpoint.
#[derive(Debug, Clone, Error)]
pub enum CheckpointError {
    /// A checkpoint batch could not be written.
    #[error("Failed to save checkpoint for run {run_id}: {reason}")]
    Save {
        /// The run the batch belongs to.
        run_id: Uuid,
        /// Why the write failed.
        reason: String,
    },

    /// A checkpoint could not be read back.
    #[error("Failed to load checkpoint for run {run_id}: {reason}")]
    Load {
        /// The run being resumed.
        run_id: Uuid,
        /// Why the read failed.
        reason: String,
    },
}
