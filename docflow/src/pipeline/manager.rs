//! Top-level orchestrator: graph cache, wave loop, retry/timeout policy,
//! checkpointing, and lifecycle events.

use super::config::{PipelineConfig, StageConfig};
use super::graph::ExecutionGraph;
use super::retry::RetryConfig;
use crate::checkpoint::CheckpointStore;
use crate::context::{PipelineContext, RunIdentity, StageContext, StageInputs};
use crate::core::{RunStatus, StageResult, StageStatus};
use crate::errors::{DocflowError, PoolError, StageError};
use crate::events::{emit_bounded, names, EventSink, NoOpEventSink};
use crate::processors::ProcessorRegistry;
use crate::resources::{AdmissionPermit, ResourceMonitor};
use crate::stages::Stage;
use crate::workers::WorkerPool;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Deadline for each lifecycle event emission; a slower sink drops the
    /// event instead of stalling the run.
    pub event_timeout: Duration,
    /// Initial delay between admission polls under resource pressure.
    pub admission_poll: Duration,
    /// Cap for the admission poll backoff.
    pub admission_poll_max: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_timeout: Duration::from_secs(1),
            admission_poll: Duration::from_millis(20),
            admission_poll_max: Duration::from_millis(500),
        }
    }
}

/// Drives pipeline runs to a terminal state.
///
/// Holds the graph cache (one build per configuration) and the run table;
/// the monitor, pool, and checkpoint store are injected and may be shared
/// with other managers.
pub struct PipelineManager {
    registry: Arc<ProcessorRegistry>,
    monitor: Arc<ResourceMonitor>,
    pool: Arc<WorkerPool>,
    checkpoints: Arc<dyn CheckpointStore>,
    event_sink: Arc<dyn EventSink>,
    config: ManagerConfig,
    graphs: DashMap<String, Arc<ExecutionGraph>>,
    runs: DashMap<Uuid, Arc<PipelineContext>>,
}

impl PipelineManager {
    /// Creates a manager over the given collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<ProcessorRegistry>,
        monitor: Arc<ResourceMonitor>,
        pool: Arc<WorkerPool>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            registry,
            monitor,
            pool,
            checkpoints,
            event_sink: Arc::new(NoOpEventSink),
            config: ManagerConfig::default(),
            graphs: DashMap::new(),
            runs: DashMap::new(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Sets the orchestrator tuning.
    #[must_use]
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolves (or builds and caches) the graph for a configuration.
    ///
    /// # Errors
    ///
    /// Returns the build-time [`ConfigError`](crate::errors::ConfigError)
    /// wrapped in [`DocflowError::Config`].
    pub fn graph_for(&self, config: &PipelineConfig) -> Result<Arc<ExecutionGraph>, DocflowError> {
        if let Some(graph) = self.graphs.get(&config.name) {
            return Ok(Arc::clone(&graph));
        }
        let graph = Arc::new(ExecutionGraph::build(config, &self.registry)?);
        self.graphs.insert(config.name.clone(), Arc::clone(&graph));
        Ok(graph)
    }

    /// Drops the cached graph for a pipeline name.
    pub fn invalidate_graph(&self, pipeline: &str) {
        self.graphs.remove(pipeline);
    }

    /// Runs a pipeline over a document to a terminal state.
    ///
    /// Stage-level failures are captured into the context, never returned:
    /// the call errs only on configuration or mandatory-checkpoint failure.
    ///
    /// # Errors
    ///
    /// Returns [`DocflowError::Config`] or [`DocflowError::Checkpoint`].
    pub async fn run(
        &self,
        config: &PipelineConfig,
        document_id: impl Into<String>,
    ) -> Result<Arc<PipelineContext>, DocflowError> {
        self.run_with_identity(config, RunIdentity::new(document_id))
            .await
    }

    /// Runs with a caller-chosen identity (fixed run ID).
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub async fn run_with_identity(
        &self,
        config: &PipelineConfig,
        identity: RunIdentity,
    ) -> Result<Arc<PipelineContext>, DocflowError> {
        self.execute(config, identity, false).await
    }

    /// Resumes a run from its checkpoint: stages the checkpoint marks
    /// completed are pre-populated and never resubmitted.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run); additionally [`DocflowError::Checkpoint`] if
    /// the stored checkpoint cannot be read.
    pub async fn resume(
        &self,
        config: &PipelineConfig,
        document_id: impl Into<String>,
        run_id: Uuid,
    ) -> Result<Arc<PipelineContext>, DocflowError> {
        self.execute(
            config,
            RunIdentity::with_run_id(document_id, run_id),
            true,
        )
        .await
    }

    /// Requests cancellation of a run: no further wave starts, and every
    /// outstanding pool item tagged with the run is cancelled. Results
    /// recorded so far stay queryable and checkpointed.
    pub fn cancel(&self, run_id: Uuid, reason: impl Into<String>) {
        if let Some(ctx) = self.runs.get(&run_id) {
            let reason = reason.into();
            info!(run_id = %run_id, reason = %reason, "Run cancellation requested");
            ctx.mark_cancelled(reason);
        }
        self.pool.cancel_run(run_id);
    }

    /// Returns a run's current status.
    #[must_use]
    pub fn run_status(&self, run_id: Uuid) -> Option<RunStatus> {
        self.runs.get(&run_id).map(|ctx| ctx.status())
    }

    /// Returns a run's context for result queries.
    #[must_use]
    pub fn run_context(&self, run_id: Uuid) -> Option<Arc<PipelineContext>> {
        self.runs.get(&run_id).map(|ctx| Arc::clone(&ctx))
    }

    /// Garbage-collects a terminal run: drops it from the run table and,
    /// for completed runs, discards its checkpoint. Failed and cancelled
    /// runs keep their checkpoint for a later [`resume`](Self::resume).
    ///
    /// # Errors
    ///
    /// Returns [`DocflowError::UnknownRun`] for an unknown run and
    /// [`DocflowError::Checkpoint`] if discarding the checkpoint fails.
    pub async fn collect_run(&self, run_id: Uuid) -> Result<(), DocflowError> {
        let ctx = self
            .runs
            .get(&run_id)
            .map(|c| Arc::clone(&c))
            .ok_or(DocflowError::UnknownRun(run_id))?;

        if !ctx.status().is_terminal() {
            return Err(DocflowError::Internal(format!(
                "run {run_id} is not terminal"
            )));
        }

        if ctx.status() == RunStatus::Completed {
            self.checkpoints.remove(run_id).await?;
        }
        self.runs.remove(&run_id);
        Ok(())
    }

    async fn execute(
        &self,
        config: &PipelineConfig,
        identity: RunIdentity,
        resume: bool,
    ) -> Result<Arc<PipelineContext>, DocflowError> {
        let graph = self.graph_for(config)?;
        let run_id = identity.run_id;

        let ctx = Arc::new(
            PipelineContext::new(identity, &config.name)
                .with_event_sink(Arc::clone(&self.event_sink)),
        );
        self.runs.insert(run_id, Arc::clone(&ctx));

        if resume {
            if let Some(saved) = self.checkpoints.load(run_id).await? {
                let mut restored = 0usize;
                for (stage, result) in saved {
                    if result.status == StageStatus::Completed {
                        ctx.record_result(stage, result);
                        restored += 1;
                    }
                }
                info!(run_id = %run_id, restored, "Resuming run from checkpoint");
            }
        }

        ctx.set_status(RunStatus::Running);
        self.emit_run_event(&ctx, names::PIPELINE_STARTED, json!({}));

        let mut critical_failure: Option<String> = None;
        let mut skip_set: HashSet<String> = HashSet::new();

        for (wave_index, wave) in graph.waves().iter().enumerate() {
            if ctx.is_cancelled() {
                break;
            }

            let mut handles = FuturesUnordered::new();
            let mut wave_outcomes: Vec<String> = Vec::new();

            for stage_name in wave {
                // Resume: completed stages are never resubmitted.
                if ctx
                    .result(stage_name)
                    .is_some_and(|r| r.status.is_terminal())
                {
                    continue;
                }

                let node = match graph.node(stage_name) {
                    Some(node) => node,
                    None => continue,
                };

                if !ctx.is_active(stage_name) {
                    ctx.record_result(
                        stage_name.clone(),
                        StageResult::skipped("deactivated by router decision"),
                    );
                    wave_outcomes.push(stage_name.clone());
                    continue;
                }

                if skip_set.contains(stage_name) && !node.config.always_run {
                    let reason = critical_failure
                        .as_deref()
                        .map_or_else(
                            || "upstream critical failure".to_string(),
                            |failed| format!("upstream critical failure in '{failed}'"),
                        );
                    ctx.record_result(stage_name.clone(), StageResult::skipped(reason));
                    wave_outcomes.push(stage_name.clone());
                    continue;
                }

                // First-declared-first-admitted: admission is awaited here,
                // in declaration order, before the next stage is considered.
                let permit = match self.await_admission(&ctx, &node.config).await {
                    Some(permit) => permit,
                    None => break, // run cancelled while deferred
                };

                self.emit_run_event(
                    &ctx,
                    names::STAGE_STARTED,
                    json!({"stage": stage_name, "wave": wave_index}),
                );

                handles.push(tokio::spawn(drive_stage(
                    Arc::clone(&ctx),
                    Arc::clone(&self.pool),
                    Arc::clone(&node.stage),
                    node.config.clone(),
                    config.retry.clone(),
                    permit,
                )));
                wave_outcomes.push(stage_name.clone());
            }

            while let Some(joined) = handles.next().await {
                match joined {
                    Ok((name, result)) => {
                        debug!(run_id = %run_id, stage = %name, status = %result.status,
                               "Stage reached terminal state");
                        ctx.record_result(name, result);
                    }
                    Err(err) => warn!(run_id = %run_id, error = %err, "Stage task join failed"),
                }
            }

            // A checkpoint write for a wave happens-before that wave's
            // results are considered resumable.
            if config.checkpoint_enabled {
                if let Err(err) = self.checkpoints.save(run_id, &ctx.results()).await {
                    if config.checkpoint_mandatory {
                        ctx.set_status(RunStatus::Failed);
                        self.emit_run_event(
                            &ctx,
                            names::PIPELINE_FAILED,
                            json!({"error": err.to_string()}),
                        );
                        self.pool.forget_run(run_id);
                        return Err(err.into());
                    }
                    warn!(run_id = %run_id, error = %err, "Best-effort checkpoint write failed");
                }
            }

            for stage_name in &wave_outcomes {
                if let Some(result) = ctx.result(stage_name) {
                    self.emit_stage_event(&ctx, stage_name, &result);
                }
            }

            for stage_name in &wave_outcomes {
                let failed = ctx
                    .result(stage_name)
                    .is_some_and(|r| r.status == StageStatus::Failed);
                let critical = graph
                    .node(stage_name)
                    .is_some_and(|node| node.config.critical);
                if failed && critical {
                    warn!(run_id = %run_id, stage = %stage_name,
                          "Critical stage failed terminally; marking dependents skipped");
                    skip_set.extend(graph.transitive_dependents(stage_name));
                    if critical_failure.is_none() {
                        critical_failure = Some(stage_name.clone());
                    }
                }
            }
        }

        let statuses: serde_json::Value = ctx
            .results()
            .iter()
            .map(|(name, result)| (name.clone(), json!(result.status)))
            .collect::<serde_json::Map<_, _>>()
            .into();

        if ctx.is_cancelled() {
            ctx.set_status(RunStatus::Cancelled);
            self.emit_run_event(
                &ctx,
                names::PIPELINE_CANCELLED,
                json!({"reason": ctx.cancel_reason(), "stages": statuses}),
            );
        } else if let Some(failed_stage) = critical_failure {
            ctx.set_status(RunStatus::Failed);
            self.emit_run_event(
                &ctx,
                names::PIPELINE_FAILED,
                json!({"failed_stage": failed_stage, "stages": statuses}),
            );
        } else {
            ctx.set_status(RunStatus::Completed);
            self.emit_run_event(
                &ctx,
                names::PIPELINE_COMPLETED,
                json!({"stages": statuses}),
            );
        }

        self.pool.forget_run(run_id);
        Ok(ctx)
    }

    /// Polls admission with exponential backoff until admitted or cancelled.
    async fn await_admission(
        &self,
        ctx: &Arc<PipelineContext>,
        stage: &StageConfig,
    ) -> Option<AdmissionPermit> {
        let mut delay = self.config.admission_poll;
        loop {
            if ctx.is_cancelled() {
                return None;
            }
            if let Some(permit) = self.monitor.admit(stage.resource_weight) {
                return Some(permit);
            }
            debug!(stage = %stage.name, delay_ms = delay.as_millis() as u64,
                   "Admission deferred under resource pressure");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.config.admission_poll_max);
        }
    }

    fn emit_stage_event(&self, ctx: &Arc<PipelineContext>, stage: &str, result: &StageResult) {
        let (event, mut payload) = match result.status {
            StageStatus::Completed => (
                names::STAGE_COMPLETED,
                json!({"duration_ms": result.duration_ms, "retry_count": result.retry_count}),
            ),
            StageStatus::Failed | StageStatus::Cancelled => (
                names::STAGE_FAILED,
                json!({"errors": result.errors, "retry_count": result.retry_count}),
            ),
            StageStatus::Skipped => {
                (names::STAGE_SKIPPED, json!({"reason": result.skip_reason}))
            }
            StageStatus::Pending | StageStatus::Running => return,
        };
        if let serde_json::Value::Object(ref mut map) = payload {
            map.insert("stage".to_string(), json!(stage));
        }
        self.emit_run_event(ctx, event, payload);
    }

    fn emit_run_event(&self, ctx: &Arc<PipelineContext>, event: &str, mut payload: serde_json::Value) {
        if let serde_json::Value::Object(ref mut map) = payload {
            map.insert("run_id".to_string(), json!(ctx.run_id().to_string()));
            map.insert("document_id".to_string(), json!(ctx.document_id()));
            map.insert("pipeline".to_string(), json!(ctx.pipeline_name()));
        }
        emit_bounded(
            &self.event_sink,
            event,
            Some(payload),
            self.config.event_timeout,
        );
    }
}

impl std::fmt::Debug for PipelineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineManager")
            .field("cached_graphs", &self.graphs.len())
            .field("runs", &self.runs.len())
            .finish()
    }
}

/// Drives one stage through admission-held execution, applying the
/// per-stage timeout and retry policy. Returns the stage's terminal result.
async fn drive_stage(
    ctx: Arc<PipelineContext>,
    pool: Arc<WorkerPool>,
    stage: Arc<dyn Stage>,
    stage_config: StageConfig,
    retry: RetryConfig,
    permit: AdmissionPermit,
) -> (String, StageResult) {
    let _permit = permit;
    let name = stage_config.name.clone();
    let declared: HashSet<String> = stage_config.depends_on.iter().cloned().collect();

    let mut prior_errors: Vec<String> = Vec::new();
    let mut attempt: u32 = 0;

    loop {
        if ctx.is_cancelled() {
            let reason = ctx
                .cancel_reason()
                .unwrap_or_else(|| "run cancelled".to_string());
            return (
                name.clone(),
                StageResult::cancelled(reason)
                    .with_retry_count(attempt)
                    .with_prior_errors(prior_errors),
            );
        }

        let inputs = StageInputs::new(ctx.completed_outputs(), declared.clone(), name.as_str());
        let stage_ctx = StageContext::new(Arc::clone(&ctx), name.as_str(), inputs);
        let runner = Arc::clone(&stage);
        let work = Box::pin(async move { runner.execute(&stage_ctx).await });

        let started = Instant::now();
        let outcome = match pool
            .submit(ctx.run_id(), name.as_str(), stage_config.execution_mode, work)
            .await
        {
            Ok(handle) => match stage_config.timeout() {
                Some(deadline) => {
                    let canceller = handle.canceller();
                    match tokio::time::timeout(deadline, handle.result()).await {
                        Ok(result) => result,
                        Err(_) => {
                            canceller.cancel();
                            Err(StageError::timeout(deadline.as_millis() as u64))
                        }
                    }
                }
                None => handle.result().await,
            },
            // Backpressure from a reject-policy pool is transient.
            Err(PoolError::QueueFull { capacity }) => Err(StageError::execution(format!(
                "worker queue full (capacity {capacity})"
            ))),
            Err(PoolError::Closed) => Err(StageError::fatal("worker pool closed")),
        };
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(output) => {
                return (
                    name.clone(),
                    StageResult::completed(output)
                        .with_duration_ms(duration_ms)
                        .with_retry_count(attempt)
                        .with_prior_errors(prior_errors),
                );
            }
            Err(err) => {
                if matches!(err, StageError::Cancelled { .. }) || ctx.is_cancelled() {
                    return (
                        name.clone(),
                        StageResult::cancelled(err.to_string())
                            .with_duration_ms(duration_ms)
                            .with_retry_count(attempt)
                            .with_prior_errors(prior_errors),
                    );
                }

                if err.is_transient() && attempt < stage_config.retries {
                    let delay = retry.delay_for(attempt);
                    debug!(stage = %name, attempt, delay_ms = delay.as_millis() as u64,
                           error = %err, "Retrying stage after transient failure");
                    prior_errors.push(err.to_string());
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    continue;
                }

                return (
                    name.clone(),
                    StageResult::failed(&err)
                        .with_duration_ms(duration_ms)
                        .with_retry_count(attempt)
                        .with_prior_errors(prior_errors),
                );
            }
        }
    }
}
