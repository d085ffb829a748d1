//! Mutable per-run context and the per-stage view handed to stages.

use super::{RunIdentity, StageInputs};
use crate::core::{RunStatus, StageResult};
use crate::events::{EventSink, NoOpEventSink};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// The mutable state of one pipeline run.
///
/// Created once per run and mutated only by the pipeline manager; stages see
/// it through [`StageContext`]. Never shared across runs. Status and partial
/// per-stage results are queryable at any time, including after a terminal
/// FAILED or CANCELLED state.
pub struct PipelineContext {
    identity: RunIdentity,
    pipeline_name: String,
    status: RwLock<RunStatus>,
    results: RwLock<HashMap<String, StageResult>>,
    /// Stages deactivated for this run by router decisions.
    inactive: RwLock<HashSet<String>>,
    event_sink: Arc<dyn EventSink>,
    cancelled: AtomicBool,
    cancel_reason: RwLock<Option<String>>,
}

impl PipelineContext {
    /// Creates a new context for a run of the named pipeline.
    #[must_use]
    pub fn new(identity: RunIdentity, pipeline_name: impl Into<String>) -> Self {
        Self {
            identity,
            pipeline_name: pipeline_name.into(),
            status: RwLock::new(RunStatus::Pending),
            results: RwLock::new(HashMap::new()),
            inactive: RwLock::new(HashSet::new()),
            event_sink: Arc::new(NoOpEventSink),
            cancelled: AtomicBool::new(false),
            cancel_reason: RwLock::new(None),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns the run ID.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.identity.run_id
    }

    /// Returns the document ID.
    #[must_use]
    pub fn document_id(&self) -> &str {
        &self.identity.document_id
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    /// Returns the current run status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        *self.status.read()
    }

    /// Transitions the run status.
    pub fn set_status(&self, status: RunStatus) {
        *self.status.write() = status;
    }

    /// Records a stage's result, superseding any previous attempt's result.
    pub fn record_result(&self, stage: impl Into<String>, result: StageResult) {
        self.results.write().insert(stage.into(), result);
    }

    /// Returns a stage's recorded result, if any.
    #[must_use]
    pub fn result(&self, stage: &str) -> Option<StageResult> {
        self.results.read().get(stage).cloned()
    }

    /// Returns a snapshot of all recorded results.
    #[must_use]
    pub fn results(&self) -> HashMap<String, StageResult> {
        self.results.read().clone()
    }

    /// Returns the output payloads of all completed stages.
    #[must_use]
    pub fn completed_outputs(&self) -> HashMap<String, Value> {
        self.results
            .read()
            .iter()
            .filter(|(_, r)| r.is_success())
            .filter_map(|(name, r)| r.output.clone().map(|o| (name.clone(), o)))
            .collect()
    }

    /// Marks stages inactive for this run (router branch pruning).
    ///
    /// The graph itself is never mutated; inactivity is a per-run overlay.
    pub fn deactivate_stages(&self, stages: impl IntoIterator<Item = String>) {
        self.inactive.write().extend(stages);
    }

    /// Returns true if the stage is active for this run.
    #[must_use]
    pub fn is_active(&self, stage: &str) -> bool {
        !self.inactive.read().contains(stage)
    }

    /// Returns the set of router-deactivated stages.
    #[must_use]
    pub fn inactive_stages(&self) -> HashSet<String> {
        self.inactive.read().clone()
    }

    /// Marks the run as cancelled with a reason. Idempotent; first reason wins.
    pub fn mark_cancelled(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.cancel_reason.write() = Some(reason.into());
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<String> {
        self.cancel_reason.read().clone()
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.event_sink
    }

    /// Emits an event enriched with the run's identity, without blocking.
    pub fn try_emit_event(&self, event_type: &str, data: Option<Value>) {
        let mut enriched = data.unwrap_or_else(|| serde_json::json!({}));

        if let Value::Object(ref mut map) = enriched {
            map.insert(
                "run_id".to_string(),
                serde_json::json!(self.identity.run_id.to_string()),
            );
            map.insert(
                "document_id".to_string(),
                serde_json::json!(self.identity.document_id),
            );
            map.insert(
                "pipeline".to_string(),
                serde_json::json!(self.pipeline_name),
            );
        }

        self.event_sink.try_emit(event_type, Some(enriched));
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("run_id", &self.identity.run_id)
            .field("document_id", &self.identity.document_id)
            .field("pipeline", &self.pipeline_name)
            .field("status", &self.status())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// The view of a run handed to a single executing stage.
#[derive(Debug)]
pub struct StageContext {
    pipeline_ctx: Arc<PipelineContext>,
    stage_name: String,
    inputs: StageInputs,
}

impl StageContext {
    /// Creates a new stage context.
    #[must_use]
    pub fn new(
        pipeline_ctx: Arc<PipelineContext>,
        stage_name: impl Into<String>,
        inputs: StageInputs,
    ) -> Self {
        Self {
            pipeline_ctx,
            stage_name: stage_name.into(),
            inputs,
        }
    }

    /// Returns the executing stage's name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns the upstream outputs visible to this stage.
    #[must_use]
    pub fn inputs(&self) -> &StageInputs {
        &self.inputs
    }

    /// Returns the run ID.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.pipeline_ctx.run_id()
    }

    /// Returns the document ID.
    #[must_use]
    pub fn document_id(&self) -> &str {
        self.pipeline_ctx.document_id()
    }

    /// Returns whether the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.pipeline_ctx.is_cancelled()
    }

    /// Records router deactivations into the run context.
    pub fn deactivate_stages(&self, stages: impl IntoIterator<Item = String>) {
        self.pipeline_ctx.deactivate_stages(stages);
    }

    /// Emits a custom event enriched with run and stage identity.
    pub fn try_emit_event(&self, event_type: &str, data: Option<Value>) {
        let mut enriched = data.unwrap_or_else(|| serde_json::json!({}));
        if let Value::Object(ref mut map) = enriched {
            map.insert("stage".to_string(), serde_json::json!(self.stage_name));
        }
        self.pipeline_ctx.try_emit_event(event_type, Some(enriched));
    }

    /// Returns the underlying run context.
    #[must_use]
    pub fn pipeline_ctx(&self) -> &Arc<PipelineContext> {
        &self.pipeline_ctx
    }
}
