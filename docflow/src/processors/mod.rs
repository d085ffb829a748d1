//! Processor capability trait and the name-keyed registry.
//!
//! Processors are the opaque units of document work (text extraction, OCR,
//! table detection) supplied by the host application. The orchestrator never
//! inspects what they do; it resolves them by name at graph-build time and
//! invokes them through [`Processor::process`].

use crate::context::StageContext;
use crate::errors::StageError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// An opaque document-processing capability.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Processes the document with the run's accumulated context.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] on failure; transience decides retryability.
    async fn process(&self, ctx: &StageContext) -> Result<serde_json::Value, StageError>;
}

/// A closure-backed processor for simple registrations.
pub struct FnProcessor<F>
where
    F: Fn(&StageContext) -> Result<serde_json::Value, StageError> + Send + Sync,
{
    func: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&StageContext) -> Result<serde_json::Value, StageError> + Send + Sync,
{
    /// Wraps a synchronous closure as a processor.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Processor for FnProcessor<F>
where
    F: Fn(&StageContext) -> Result<serde_json::Value, StageError> + Send + Sync,
{
    async fn process(&self, ctx: &StageContext) -> Result<serde_json::Value, StageError> {
        (self.func)(ctx)
    }
}

/// Name-keyed registry of stage capabilities.
///
/// Processors are the primary entry; validators, routers, and mergers are
/// registered the same way so declarative configurations can reference any
/// stage's behavior by name. Lookups are resolved and existence-checked at
/// graph-build time so a misconfigured pipeline fails fast instead of at
/// invocation time.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: DashMap<String, Arc<dyn Processor>>,
    validators: DashMap<String, Arc<dyn crate::stages::Validate>>,
    routers: DashMap<String, Arc<dyn crate::stages::Route>>,
    mergers: DashMap<String, Arc<dyn crate::stages::Merge>>,
}

impl ProcessorRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a processor under a name, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, processor: Arc<dyn Processor>) {
        self.processors.insert(name.into(), processor);
    }

    /// Registers a validator capability.
    pub fn register_validator(
        &self,
        name: impl Into<String>,
        validator: Arc<dyn crate::stages::Validate>,
    ) {
        self.validators.insert(name.into(), validator);
    }

    /// Registers a router capability.
    pub fn register_router(&self, name: impl Into<String>, router: Arc<dyn crate::stages::Route>) {
        self.routers.insert(name.into(), router);
    }

    /// Registers a merge capability for aggregator stages.
    pub fn register_merge(&self, name: impl Into<String>, merger: Arc<dyn crate::stages::Merge>) {
        self.mergers.insert(name.into(), merger);
    }

    /// Resolves a processor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Resolves a validator by name.
    #[must_use]
    pub fn get_validator(&self, name: &str) -> Option<Arc<dyn crate::stages::Validate>> {
        self.validators.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Resolves a router by name.
    #[must_use]
    pub fn get_router(&self, name: &str) -> Option<Arc<dyn crate::stages::Route>> {
        self.routers.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Resolves a merge capability by name.
    #[must_use]
    pub fn get_merge(&self, name: &str) -> Option<Arc<dyn crate::stages::Merge>> {
        self.mergers.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Returns true if a processor is registered under the name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    /// Returns the registered processor names, unordered.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.processors.iter().map(|e| e.key().clone()).collect()
    }

    /// Returns the number of registered processors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Returns true if no processor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PipelineContext, RunIdentity, StageInputs};

    fn stage_ctx() -> StageContext {
        let pipeline_ctx = Arc::new(PipelineContext::new(RunIdentity::new("doc-1"), "test"));
        StageContext::new(pipeline_ctx, "extract", StageInputs::default())
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let registry = ProcessorRegistry::new();
        registry.register(
            "extract_text",
            Arc::new(FnProcessor::new(|_ctx| Ok(serde_json::json!({"chars": 120})))),
        );

        assert!(registry.contains("extract_text"));
        let processor = registry.get("extract_text").unwrap();
        let out = processor.process(&stage_ctx()).await.unwrap();
        assert_eq!(out["chars"], 120);
    }

    #[test]
    fn test_missing_processor() {
        let registry = ProcessorRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(!registry.contains("nope"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reregistration_replaces() {
        let registry = ProcessorRegistry::new();
        registry.register(
            "p",
            Arc::new(FnProcessor::new(|_| Ok(serde_json::json!(1)))),
        );
        registry.register(
            "p",
            Arc::new(FnProcessor::new(|_| Ok(serde_json::json!(2)))),
        );
        assert_eq!(registry.len(), 1);
    }
}
