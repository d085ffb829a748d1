//! Validator stage: checks upstream outputs and reports structured issues.

use super::Stage;
use crate::context::StageContext;
use crate::core::StageKind;
use crate::errors::StageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Severity of a single validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// Worth noting, does not fail the check.
    Warning,
    /// Fails the check.
    Error,
}

/// A single finding from a validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// How bad it is.
    pub severity: IssueSeverity,
    /// What was found.
    pub message: String,
}

impl ValidationIssue {
    /// Creates an error-severity issue.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            message: message.into(),
        }
    }

    /// Creates a warning-severity issue.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            message: message.into(),
        }
    }
}

/// The outcome of a validation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the checks passed (no error-severity issues).
    pub passed: bool,
    /// All findings, warnings included.
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Builds a report from issues; passes when no issue is error-severity.
    #[must_use]
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let passed = !issues.iter().any(|i| i.severity == IssueSeverity::Error);
        Self { passed, issues }
    }

    /// A clean pass.
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
        }
    }

    fn error_messages(&self) -> Vec<String> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .map(|i| i.message.clone())
            .collect()
    }
}

/// A validation capability run against upstream outputs.
#[async_trait]
pub trait Validate: Send + Sync {
    /// Runs the checks.
    async fn validate(&self, ctx: &StageContext) -> ValidationReport;
}

/// A closure-backed validator.
pub struct FnValidator<F>
where
    F: Fn(&StageContext) -> ValidationReport + Send + Sync,
{
    func: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&StageContext) -> ValidationReport + Send + Sync,
{
    /// Wraps a synchronous closure as a validator.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Validate for FnValidator<F>
where
    F: Fn(&StageContext) -> ValidationReport + Send + Sync,
{
    async fn validate(&self, ctx: &StageContext) -> ValidationReport {
        (self.func)(ctx)
    }
}

/// A stage wrapping a [`Validate`] capability.
///
/// A failing report becomes a non-transient stage failure; whether that
/// halts the pipeline depends on the stage's `critical` flag, which the
/// manager applies. The report itself is the stage's output payload, so
/// warnings survive into the run's results either way.
pub struct ValidatorStage {
    name: String,
    validator: Arc<dyn Validate>,
}

impl ValidatorStage {
    /// Creates a new validator stage.
    #[must_use]
    pub fn new(name: impl Into<String>, validator: Arc<dyn Validate>) -> Self {
        Self {
            name: name.into(),
            validator,
        }
    }
}

impl std::fmt::Debug for ValidatorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl Stage for ValidatorStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Validator
    }

    async fn execute(&self, ctx: &StageContext) -> Result<serde_json::Value, StageError> {
        let report = self.validator.validate(ctx).await;

        if report.passed {
            serde_json::to_value(&report)
                .map_err(|e| StageError::fatal(format!("report serialization: {e}")))
        } else {
            Err(StageError::Validation {
                issues: report.error_messages(),
            })
        }
    }
}
