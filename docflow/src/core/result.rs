//! Stage result type with factory methods.

use super::StageStatus;
use crate::errors::StageError;
use serde::{Deserialize, Serialize};

/// The recorded outcome of a stage within a run.
///
/// A `StageResult` is immutable once written into the run's context; a
/// retry attempt supersedes the previous attempt's result wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// The terminal (or in-flight) status of the stage.
    pub status: StageStatus,

    /// The opaque output payload, present on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Errors accumulated across attempts, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    /// Why the stage was skipped, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,

    /// Wall-clock duration of the final attempt in milliseconds.
    #[serde(default)]
    pub duration_ms: f64,

    /// Number of re-attempts consumed (0 = succeeded or failed first try).
    #[serde(default)]
    pub retry_count: u32,
}

impl StageResult {
    /// Creates a completed result with an output payload.
    #[must_use]
    pub fn completed(output: serde_json::Value) -> Self {
        Self {
            status: StageStatus::Completed,
            output: Some(output),
            errors: Vec::new(),
            skip_reason: None,
            duration_ms: 0.0,
            retry_count: 0,
        }
    }

    /// Creates a failed result from the final attempt's error.
    #[must_use]
    pub fn failed(error: &StageError) -> Self {
        Self {
            status: StageStatus::Failed,
            output: None,
            errors: vec![error.to_string()],
            skip_reason: None,
            duration_ms: 0.0,
            retry_count: 0,
        }
    }

    /// Creates a skipped result with a reason.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            output: None,
            errors: Vec::new(),
            skip_reason: Some(reason.into()),
            duration_ms: 0.0,
            retry_count: 0,
        }
    }

    /// Creates a cancelled result with a reason.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Cancelled,
            output: None,
            errors: vec![reason.into()],
            skip_reason: None,
            duration_ms: 0.0,
            retry_count: 0,
        }
    }

    /// Sets the final attempt's duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Sets the consumed retry count.
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Prepends errors from earlier attempts.
    #[must_use]
    pub fn with_prior_errors(mut self, mut prior: Vec<String>) -> Self {
        prior.append(&mut self.errors);
        self.errors = prior;
        self
    }

    /// Returns true if the stage produced a usable output.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the result is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_completed_result() {
        let result = StageResult::completed(serde_json::json!({"pages": 12}))
            .with_duration_ms(84.2);

        assert!(result.is_success());
        assert!(result.is_terminal());
        assert_eq!(result.retry_count, 0);
        assert_eq!(result.output, Some(serde_json::json!({"pages": 12})));
    }

    #[test]
    fn test_failed_result_carries_error() {
        let err = StageError::execution("backend unreachable");
        let result = StageResult::failed(&err).with_retry_count(2);

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.retry_count, 2);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("backend unreachable"));
    }

    #[test]
    fn test_skipped_result() {
        let result = StageResult::skipped("pruned by router 'classify'");
        assert_eq!(result.status, StageStatus::Skipped);
        assert_eq!(
            result.skip_reason.as_deref(),
            Some("pruned by router 'classify'")
        );
        assert!(!result.is_success());
    }

    #[test]
    fn test_prior_errors_ordering() {
        let err = StageError::execution("third");
        let result = StageResult::failed(&err)
            .with_prior_errors(vec!["first".to_string(), "second".to_string()]);

        assert_eq!(result.errors[0], "first");
        assert_eq!(result.errors[1], "second");
        assert!(result.errors[2].contains("third"));
    }

    #[test]
    fn test_result_serde_roundtrip() {
        let result = StageResult::completed(serde_json::json!("text"))
            .with_duration_ms(1.5)
            .with_retry_count(1);

        let json = serde_json::to_string(&result).unwrap();
        let back: StageResult = serde_json::from_str(&json).unwrap();

        assert_eq!(back.status, StageStatus::Completed);
        assert_eq!(back.retry_count, 1);
        assert_eq!(back.output, Some(serde_json::json!("text")));
    }
}
