//! Processor stage: invokes an externally registered processor.

use super::Stage;
use crate::context::StageContext;
use crate::core::StageKind;
use crate::errors::StageError;
use crate::processors::Processor;
use async_trait::async_trait;
use std::sync::Arc;

/// A stage that invokes a registry processor by its resolved handle.
///
/// The handle is resolved at graph-build time; by the time this stage
/// executes, the processor is known to exist.
pub struct ProcessorStage {
    name: String,
    processor: Arc<dyn Processor>,
}

impl ProcessorStage {
    /// Creates a new processor stage.
    #[must_use]
    pub fn new(name: impl Into<String>, processor: Arc<dyn Processor>) -> Self {
        Self {
            name: name.into(),
            processor,
        }
    }
}

impl std::fmt::Debug for ProcessorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl Stage for ProcessorStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Processor
    }

    async fn execute(&self, ctx: &StageContext) -> Result<serde_json::Value, StageError> {
        self.processor.process(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PipelineContext, RunIdentity, StageInputs};
    use crate::processors::FnProcessor;

    fn ctx() -> StageContext {
        let pipeline_ctx = Arc::new(PipelineContext::new(RunIdentity::new("doc-1"), "test"));
        StageContext::new(pipeline_ctx, "extract", StageInputs::default())
    }

    #[tokio::test]
    async fn test_processor_invocation() {
        let stage = ProcessorStage::new(
            "extract",
            Arc::new(FnProcessor::new(|_| Ok(serde_json::json!({"chars": 42})))),
        );

        let out = stage.execute(&ctx()).await.unwrap();
        assert_eq!(out["chars"], 42);
    }

    #[tokio::test]
    async fn test_processor_error_surfaces() {
        let stage = ProcessorStage::new(
            "extract",
            Arc::new(FnProcessor::new(|_| {
                Err(StageError::execution("backend down"))
            })),
        );

        let err = stage.execute(&ctx()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
