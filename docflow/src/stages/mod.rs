//! Stage trait and the four stage variants.
//!
//! Stages are the units of work the orchestrator schedules. Their payloads
//! are opaque; the orchestrator only sequences them.

mod aggregator;
mod processor;
mod router;
mod validator;

pub use aggregator::{AggregatorStage, KeyedMerge, Merge};
pub use processor::ProcessorStage;
pub use router::{FnRouter, Route, RouteDecision, RouterStage};
pub use validator::{
    FnValidator, IssueSeverity, Validate, ValidationIssue, ValidationReport, ValidatorStage,
};

use crate::context::StageContext;
use crate::core::StageKind;
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
///
/// A stage's `execute` returns the opaque output payload on success; the
/// orchestrator wraps the outcome (with duration and retry accounting) into
/// the run's `StageResult`.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Returns the kind of work the stage performs.
    fn kind(&self) -> StageKind;

    /// Executes the stage against the run's accumulated context.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`]; the retry policy consults its transience.
    async fn execute(&self, ctx: &StageContext) -> Result<serde_json::Value, StageError>;
}
