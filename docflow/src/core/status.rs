//! Status and kind enums for stages and runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// A stage that invokes an externally registered processor.
    Processor,
    /// A stage that checks upstream outputs and reports issues.
    Validator,
    /// A stage that prunes downstream branches for the current run.
    Router,
    /// A stage that merges outputs from all its dependencies.
    Aggregator,
}

impl Default for StageKind {
    fn default() -> Self {
        Self::Processor
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processor => write!(f, "processor"),
            Self::Validator => write!(f, "validator"),
            Self::Router => write!(f, "router"),
            Self::Aggregator => write!(f, "aggregator"),
        }
    }
}

/// Preferred execution backend for a stage's work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Non-blocking I/O-bound work on the async executor.
    Async,
    /// Blocking calls on a dedicated worker thread.
    Thread,
    /// CPU-bound, isolation-requiring work; cancellation is forced after a
    /// grace period instead of cooperative.
    Process,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Async
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Async => write!(f, "async"),
            Self::Thread => write!(f, "thread"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// The execution status of a single stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not been submitted yet.
    Pending,
    /// Stage is currently executing.
    Running,
    /// Stage completed successfully.
    Completed,
    /// Stage failed terminally (retries exhausted or non-transient error).
    Failed,
    /// Stage was never executed (router-pruned, upstream critical failure,
    /// or already satisfied by a checkpoint).
    Skipped,
    /// Stage was cancelled before reaching a result.
    Cancelled,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal per-stage state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Returns true if the stage produced a usable result.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// The lifecycle state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run created, not yet started.
    Pending,
    /// Run is driving waves.
    Running,
    /// All waves exhausted without a critical failure.
    Completed,
    /// A critical stage failed terminally.
    Failed,
    /// An external cancel request was honored.
    Cancelled,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RunStatus {
    /// Returns true if the run has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Completed.to_string(), "completed");
        assert_eq!(StageStatus::Skipped.to_string(), "skipped");
        assert_eq!(StageStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_stage_status_is_terminal() {
        assert!(StageStatus::Completed.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
        assert!(StageStatus::Skipped.is_terminal());
        assert!(StageStatus::Cancelled.is_terminal());
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
    }

    #[test]
    fn test_run_status_is_terminal() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Skipped).unwrap();
        assert_eq!(json, r#""skipped""#);
        let back: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StageStatus::Skipped);
    }

    #[test]
    fn test_execution_mode_serialize() {
        let json = serde_json::to_string(&ExecutionMode::Process).unwrap();
        assert_eq!(json, r#""process""#);
    }

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::Processor.to_string(), "processor");
        assert_eq!(StageKind::Router.to_string(), "router");
        assert_eq!(StageKind::Validator.to_string(), "validator");
        assert_eq!(StageKind::Aggregator.to_string(), "aggregator");
    }
}
