//! Aggregator stage: merges outputs from all declared dependencies.

use super::Stage;
use crate::context::StageContext;
use crate::core::StageKind;
use crate::errors::StageError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A merge capability combining dependency outputs into one payload.
pub trait Merge: Send + Sync {
    /// Merges the collected parts, keyed by dependency name.
    ///
    /// Dependencies that did not complete (skipped or failed non-critically)
    /// are absent from `parts`.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] if the parts cannot be combined.
    fn merge(&self, parts: &BTreeMap<String, Value>) -> Result<Value, StageError>;
}

/// The default merge: a JSON object keyed by dependency name.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyedMerge;

impl Merge for KeyedMerge {
    fn merge(&self, parts: &BTreeMap<String, Value>) -> Result<Value, StageError> {
        let map: serde_json::Map<String, Value> = parts
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Value::Object(map))
    }
}

/// A stage that waits for all declared dependencies and merges their outputs.
///
/// The wave schedule already guarantees every dependency is terminal before
/// this stage starts, divergent branches included; the aggregator only
/// gathers what completed.
pub struct AggregatorStage {
    name: String,
    merger: Arc<dyn Merge>,
}

impl AggregatorStage {
    /// Creates an aggregator with the default keyed merge.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            merger: Arc::new(KeyedMerge),
        }
    }

    /// Creates an aggregator with a custom merge.
    #[must_use]
    pub fn with_merge(name: impl Into<String>, merger: Arc<dyn Merge>) -> Self {
        Self {
            name: name.into(),
            merger,
        }
    }
}

impl std::fmt::Debug for AggregatorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl Stage for AggregatorStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Aggregator
    }

    async fn execute(&self, ctx: &StageContext) -> Result<Value, StageError> {
        let mut parts = BTreeMap::new();
        for dep in ctx.inputs().declared_dependencies().clone() {
            if let Some(output) = ctx.inputs().get(&dep)? {
                parts.insert(dep, output.clone());
            }
        }
        self.merger.merge(&parts)
    }
}
