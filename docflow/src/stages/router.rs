//! Router stage: prunes downstream branches for the current run.

use super::Stage;
use crate::context::StageContext;
use crate::core::StageKind;
use crate::errors::StageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The branch decision a router produces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Stage names to deactivate for this run.
    pub deactivate: Vec<String>,
}

impl RouteDecision {
    /// Keeps every branch active.
    #[must_use]
    pub fn keep_all() -> Self {
        Self::default()
    }

    /// Deactivates the named stages.
    #[must_use]
    pub fn deactivate(stages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            deactivate: stages.into_iter().map(Into::into).collect(),
        }
    }
}

/// A routing capability inspecting the run context.
#[async_trait]
pub trait Route: Send + Sync {
    /// Decides which downstream stages to prune.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] if the decision cannot be made.
    async fn route(&self, ctx: &StageContext) -> Result<RouteDecision, StageError>;
}

/// A closure-backed router.
pub struct FnRouter<F>
where
    F: Fn(&StageContext) -> Result<RouteDecision, StageError> + Send + Sync,
{
    func: F,
}

impl<F> FnRouter<F>
where
    F: Fn(&StageContext) -> Result<RouteDecision, StageError> + Send + Sync,
{
    /// Wraps a synchronous closure as a router.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Route for FnRouter<F>
where
    F: Fn(&StageContext) -> Result<RouteDecision, StageError> + Send + Sync,
{
    async fn route(&self, ctx: &StageContext) -> Result<RouteDecision, StageError> {
        (self.func)(ctx)
    }
}

/// A stage wrapping a [`Route`] capability.
///
/// The decision is recorded as a per-run overlay on the immutable graph:
/// deactivated stages surface as `skipped` and are never submitted to the
/// worker pool. The decision is also the stage's output payload.
pub struct RouterStage {
    name: String,
    router: Arc<dyn Route>,
}

impl RouterStage {
    /// Creates a new router stage.
    #[must_use]
    pub fn new(name: impl Into<String>, router: Arc<dyn Route>) -> Self {
        Self {
            name: name.into(),
            router,
        }
    }
}

impl std::fmt::Debug for RouterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl Stage for RouterStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Router
    }

    async fn execute(&self, ctx: &StageContext) -> Result<serde_json::Value, StageError> {
        let decision = self.router.route(ctx).await?;
        ctx.deactivate_stages(decision.deactivate.clone());
        serde_json::to_value(&decision)
            .map_err(|e| StageError::fatal(format!("decision serialization: {e}")))
    }
}
