//! End-to-end orchestration tests over full pipeline runs.

use super::{JitterStrategy, ManagerConfig, PipelineConfig, PipelineManager, RetryConfig, StageConfig};
use crate::checkpoint::CheckpointStore;
use crate::core::{RunStatus, StageStatus};
use crate::errors::DocflowError;
use crate::events::CollectingEventSink;
use crate::processors::ProcessorRegistry;
use crate::resources::{MonitorConfig, ResourceLimits, ResourceMonitor};
use crate::stages::{FnRouter, FnValidator, RouteDecision, ValidationIssue, ValidationReport};
use crate::testing::{
    CountingCheckpointStore, FailingCheckpointStore, RecordingProcessor, ScriptedSampler,
};
use crate::workers::{PoolConfig, WorkerPool};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    registry: Arc<ProcessorRegistry>,
    monitor: Arc<ResourceMonitor>,
    store: Arc<CountingCheckpointStore>,
    sink: Arc<CollectingEventSink>,
}

impl Harness {
    fn new() -> Self {
        Self::with_limits(ResourceLimits {
            max_cpu_percent: 90.0,
            max_memory_percent: 90.0,
            max_concurrent: 16,
        })
    }

    fn with_limits(limits: ResourceLimits) -> Self {
        let monitor = ResourceMonitor::with_sampler(
            MonitorConfig {
                limits,
                ..MonitorConfig::default()
            },
            Arc::new(ScriptedSampler::constant(5.0, 5.0)),
        );
        Self {
            registry: Arc::new(ProcessorRegistry::new()),
            monitor,
            store: Arc::new(CountingCheckpointStore::new()),
            sink: Arc::new(CollectingEventSink::new()),
        }
    }

    fn manager(&self) -> Arc<PipelineManager> {
        Arc::new(
            PipelineManager::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.monitor),
                WorkerPool::new(PoolConfig::default()),
                self.store.clone() as Arc<dyn CheckpointStore>,
            )
            .with_event_sink(self.sink.clone())
            .with_config(ManagerConfig {
                admission_poll: Duration::from_millis(5),
                admission_poll_max: Duration::from_millis(50),
                ..ManagerConfig::default()
            }),
        )
    }

    fn processor(&self, name: &str, processor: RecordingProcessor) -> Arc<RecordingProcessor> {
        let processor = Arc::new(processor);
        self.registry.register(name, processor.clone());
        processor
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .with_base_delay_ms(1)
        .with_jitter(JitterStrategy::None)
}

#[tokio::test]
async fn test_linear_critical_failure_skips_dependents() {
    let harness = Harness::new();
    let a = harness.processor("a", RecordingProcessor::always_failing());
    let b = harness.processor("b", RecordingProcessor::new(serde_json::json!("b")));
    let c = harness.processor("c", RecordingProcessor::new(serde_json::json!("c")));

    let config = PipelineConfig::new("linear")
        .unwrap()
        .with_retry(fast_retry())
        .with_stage(StageConfig::processor("a", "a").critical().with_retries(1))
        .with_stage(StageConfig::processor("b", "b").depends_on(["a"]))
        .with_stage(StageConfig::processor("c", "c").depends_on(["b"]));

    let ctx = harness.manager().run(&config, "doc-1").await.unwrap();

    assert_eq!(ctx.status(), RunStatus::Failed);
    assert_eq!(ctx.result("a").unwrap().status, StageStatus::Failed);
    assert_eq!(ctx.result("a").unwrap().retry_count, 1);
    assert_eq!(ctx.result("b").unwrap().status, StageStatus::Skipped);
    assert_eq!(ctx.result("c").unwrap().status, StageStatus::Skipped);

    assert_eq!(a.call_count(), 2); // initial try + one retry
    assert_eq!(b.call_count(), 0);
    assert_eq!(c.call_count(), 0);
}

#[tokio::test]
async fn test_diamond_aggregator_merges_both_branches() {
    let harness = Harness::new();
    harness.processor("a", RecordingProcessor::new(serde_json::json!("root")));
    harness.processor("b", RecordingProcessor::new(serde_json::json!({"pages": 2})));
    harness.processor("c", RecordingProcessor::new(serde_json::json!({"tables": 1})));

    let config = PipelineConfig::new("diamond")
        .unwrap()
        .with_stage(StageConfig::processor("a", "a"))
        .with_stage(StageConfig::processor("b", "b").depends_on(["a"]))
        .with_stage(StageConfig::processor("c", "c").depends_on(["a"]))
        .with_stage(StageConfig::aggregator("d").depends_on(["b", "c"]));

    let ctx = harness.manager().run(&config, "doc-2").await.unwrap();

    assert_eq!(ctx.status(), RunStatus::Completed);
    let merged = ctx.result("d").unwrap().output.unwrap();
    assert_eq!(merged["b"]["pages"], 2);
    assert_eq!(merged["c"]["tables"], 1);
}

#[tokio::test]
async fn test_retry_succeeds_on_third_attempt() {
    let harness = Harness::new();
    let flaky = harness.processor(
        "flaky",
        RecordingProcessor::failing_first(serde_json::json!("finally"), 2),
    );

    let config = PipelineConfig::new("retry")
        .unwrap()
        .with_retry(fast_retry())
        .with_stage(StageConfig::processor("flaky", "flaky").with_retries(2));

    let ctx = harness.manager().run(&config, "doc-3").await.unwrap();

    let result = ctx.result("flaky").unwrap();
    assert_eq!(result.status, StageStatus::Completed);
    assert_eq!(result.retry_count, 2);
    assert_eq!(result.errors.len(), 2); // the two failed attempts stay on record
    assert_eq!(flaky.call_count(), 3);
    assert_eq!(ctx.status(), RunStatus::Completed);
}

#[tokio::test]
async fn test_non_transient_failure_is_not_retried() {
    let harness = Harness::new();
    let fatal = harness.processor("fatal", RecordingProcessor::always_fatal());

    let config = PipelineConfig::new("fatal")
        .unwrap()
        .with_retry(fast_retry())
        .with_stage(StageConfig::processor("fatal", "fatal").with_retries(5));

    let ctx = harness.manager().run(&config, "doc-4").await.unwrap();

    assert_eq!(ctx.result("fatal").unwrap().status, StageStatus::Failed);
    assert_eq!(ctx.result("fatal").unwrap().retry_count, 0);
    assert_eq!(fatal.call_count(), 1);
}

#[tokio::test]
async fn test_cancel_mid_wave_prevents_later_waves() {
    let harness = Harness::new();
    let slow = harness.processor(
        "slow",
        RecordingProcessor::new(serde_json::json!("slow")).with_delay(Duration::from_millis(500)),
    );
    let after = harness.processor("after", RecordingProcessor::new(serde_json::json!("after")));

    let config = PipelineConfig::new("cancellable")
        .unwrap()
        .with_stage(StageConfig::processor("slow", "slow"))
        .with_stage(StageConfig::processor("after", "after").depends_on(["slow"]));

    let manager = harness.manager();
    let identity = crate::context::RunIdentity::new("doc-5");
    let run_id = identity.run_id;

    let runner = Arc::clone(&manager);
    let run_task =
        tokio::spawn(async move { runner.run_with_identity(&config, identity).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.cancel(run_id, "operator stop");

    let ctx = run_task.await.unwrap().unwrap();

    assert_eq!(ctx.status(), RunStatus::Cancelled);
    assert_eq!(ctx.result("slow").unwrap().status, StageStatus::Cancelled);
    assert!(ctx.result("after").is_none());
    assert_eq!(slow.call_count(), 1);
    assert_eq!(after.call_count(), 0);
}

#[tokio::test]
async fn test_resume_reexecutes_only_missing_stages() {
    let harness = Harness::new();
    let a = harness.processor("a", RecordingProcessor::new(serde_json::json!("a-out")));
    let b = harness.processor(
        "b",
        RecordingProcessor::failing_first(serde_json::json!("b-out"), 1),
    );
    let c = harness.processor("c", RecordingProcessor::new(serde_json::json!("c-out")));

    let config = PipelineConfig::new("resumable")
        .unwrap()
        .with_retry(fast_retry())
        .with_stage(StageConfig::processor("a", "a"))
        .with_stage(StageConfig::processor("b", "b").depends_on(["a"]).critical())
        .with_stage(StageConfig::processor("c", "c").depends_on(["b"]));

    let manager = harness.manager();

    let first = manager.run(&config, "doc-6").await.unwrap();
    assert_eq!(first.status(), RunStatus::Failed);
    assert_eq!(first.result("c").unwrap().status, StageStatus::Skipped);

    let resumed = manager
        .resume(&config, "doc-6", first.run_id())
        .await
        .unwrap();

    assert_eq!(resumed.status(), RunStatus::Completed);
    assert_eq!(resumed.result("b").unwrap().status, StageStatus::Completed);
    assert_eq!(resumed.result("c").unwrap().status, StageStatus::Completed);

    // Completed work from the first run was never resubmitted.
    assert_eq!(a.call_count(), 1);
    assert_eq!(b.call_count(), 2);
    assert_eq!(c.call_count(), 1);
}

#[tokio::test]
async fn test_cycle_fails_before_any_processor_runs() {
    let harness = Harness::new();
    let p = harness.processor("p", RecordingProcessor::new(serde_json::json!(null)));

    let config = PipelineConfig::new("cyclic")
        .unwrap()
        .with_stage(StageConfig::processor("a", "p").depends_on(["b"]))
        .with_stage(StageConfig::processor("b", "p").depends_on(["a"]));

    let err = harness.manager().run(&config, "doc-7").await.unwrap_err();

    assert!(matches!(err, DocflowError::Config(_)));
    assert_eq!(p.call_count(), 0);
}

#[tokio::test]
async fn test_router_prunes_branch() {
    let harness = Harness::new();
    harness.registry.register_router(
        "layout_router",
        Arc::new(FnRouter::new(|_| {
            Ok(RouteDecision::deactivate(["tables"]))
        })),
    );
    let text = harness.processor("text", RecordingProcessor::new(serde_json::json!("prose")));
    let tables = harness.processor("tables", RecordingProcessor::new(serde_json::json!("grid")));

    let config = PipelineConfig::new("routed")
        .unwrap()
        .with_stage(StageConfig::router("classify", "layout_router"))
        .with_stage(StageConfig::processor("text", "text").depends_on(["classify"]))
        .with_stage(StageConfig::processor("tables", "tables").depends_on(["classify"]))
        .with_stage(StageConfig::aggregator("combine").depends_on(["text", "tables"]));

    let ctx = harness.manager().run(&config, "doc-8").await.unwrap();

    assert_eq!(ctx.status(), RunStatus::Completed);
    assert_eq!(ctx.result("tables").unwrap().status, StageStatus::Skipped);
    assert_eq!(tables.call_count(), 0);
    assert_eq!(text.call_count(), 1);

    let merged = ctx.result("combine").unwrap().output.unwrap();
    assert_eq!(merged["text"], "prose");
    assert!(merged.get("tables").is_none());
}

#[tokio::test]
async fn test_validator_failure_respects_criticality() {
    let harness = Harness::new();
    harness.registry.register_validator(
        "page_check",
        Arc::new(FnValidator::new(|_| {
            ValidationReport::from_issues(vec![ValidationIssue::error("document has no pages")])
        })),
    );
    harness.processor("extract", RecordingProcessor::new(serde_json::json!("text")));
    let downstream =
        harness.processor("downstream", RecordingProcessor::new(serde_json::json!("d")));

    // Non-critical validator failure: recorded, pipeline completes.
    let tolerant = PipelineConfig::new("tolerant")
        .unwrap()
        .with_stage(StageConfig::processor("extract", "extract"))
        .with_stage(StageConfig::validator("check", "page_check").depends_on(["extract"]))
        .with_stage(StageConfig::processor("downstream", "downstream").depends_on(["extract"]));

    let ctx = harness.manager().run(&tolerant, "doc-9").await.unwrap();
    assert_eq!(ctx.status(), RunStatus::Completed);
    assert_eq!(ctx.result("check").unwrap().status, StageStatus::Failed);
    assert_eq!(downstream.call_count(), 1);

    // Critical validator failure: dependents skipped, run fails.
    let strict = PipelineConfig::new("strict")
        .unwrap()
        .with_stage(StageConfig::processor("extract", "extract"))
        .with_stage(
            StageConfig::validator("check", "page_check")
                .depends_on(["extract"])
                .critical(),
        )
        .with_stage(StageConfig::processor("publish", "downstream").depends_on(["check"]));

    let ctx = harness.manager().run(&strict, "doc-10").await.unwrap();
    assert_eq!(ctx.status(), RunStatus::Failed);
    assert_eq!(ctx.result("publish").unwrap().status, StageStatus::Skipped);
}

#[tokio::test]
async fn test_backpressure_defers_but_everything_executes() {
    let harness = Harness::with_limits(ResourceLimits {
        max_cpu_percent: 90.0,
        max_memory_percent: 90.0,
        max_concurrent: 1,
    });
    let mut processors = Vec::new();
    for name in ["p1", "p2", "p3"] {
        processors.push(harness.processor(
            name,
            RecordingProcessor::new(serde_json::json!(name))
                .with_delay(Duration::from_millis(20)),
        ));
    }

    let config = PipelineConfig::new("pressured")
        .unwrap()
        .with_stage(StageConfig::processor("p1", "p1"))
        .with_stage(StageConfig::processor("p2", "p2"))
        .with_stage(StageConfig::processor("p3", "p3"));

    let ctx = harness.manager().run(&config, "doc-11").await.unwrap();

    assert_eq!(ctx.status(), RunStatus::Completed);
    for (name, processor) in ["p1", "p2", "p3"].iter().zip(&processors) {
        assert_eq!(ctx.result(name).unwrap().status, StageStatus::Completed);
        assert_eq!(processor.call_count(), 1);
    }
    // Admission was deferred (observed wait), never dropped.
    assert!(harness.monitor.metrics().deferred() > 0);
    assert_eq!(harness.monitor.metrics().admitted(), 3);
}

#[tokio::test]
async fn test_non_critical_failure_keeps_independent_branches() {
    let harness = Harness::new();
    harness.processor("broken", RecordingProcessor::always_fatal());
    let other = harness.processor("other", RecordingProcessor::new(serde_json::json!("ok")));
    let child = harness.processor("child", RecordingProcessor::new(serde_json::json!("ran")));

    let config = PipelineConfig::new("tolerant-branches")
        .unwrap()
        .with_stage(StageConfig::processor("broken", "broken"))
        .with_stage(StageConfig::processor("other", "other"))
        .with_stage(StageConfig::processor("child", "child").depends_on(["broken"]));

    let ctx = harness.manager().run(&config, "doc-12").await.unwrap();

    // Failure was recorded but nothing was critical.
    assert_eq!(ctx.status(), RunStatus::Completed);
    assert_eq!(ctx.result("broken").unwrap().status, StageStatus::Failed);
    assert_eq!(other.call_count(), 1);
    // The dependent still ran: its dependency reached a terminal state.
    assert_eq!(child.call_count(), 1);
}

#[tokio::test]
async fn test_always_run_stage_survives_critical_failure() {
    let harness = Harness::new();
    harness.processor("ingest", RecordingProcessor::always_fatal());
    let report = harness.processor("report", RecordingProcessor::new(serde_json::json!("report")));
    let publish = harness.processor("publish", RecordingProcessor::new(serde_json::json!("pub")));

    let config = PipelineConfig::new("cleanup")
        .unwrap()
        .with_stage(StageConfig::processor("ingest", "ingest").critical())
        .with_stage(StageConfig::processor("publish", "publish").depends_on(["ingest"]))
        .with_stage(
            StageConfig::processor("report", "report")
                .depends_on(["ingest"])
                .always_run(),
        );

    let ctx = harness.manager().run(&config, "doc-13").await.unwrap();

    assert_eq!(ctx.status(), RunStatus::Failed);
    assert_eq!(ctx.result("publish").unwrap().status, StageStatus::Skipped);
    assert_eq!(publish.call_count(), 0);
    assert_eq!(ctx.result("report").unwrap().status, StageStatus::Completed);
    assert_eq!(report.call_count(), 1);
}

#[tokio::test]
async fn test_timeout_is_retried_as_transient() {
    let harness = Harness::new();
    let sleepy = harness.processor(
        "sleepy",
        RecordingProcessor::new(serde_json::json!("late")).with_delay(Duration::from_secs(30)),
    );

    let config = PipelineConfig::new("deadline")
        .unwrap()
        .with_retry(fast_retry())
        .with_stage(
            StageConfig::processor("sleepy", "sleepy")
                .with_timeout(Duration::from_millis(20))
                .with_retries(1),
        );

    let ctx = harness.manager().run(&config, "doc-14").await.unwrap();

    let result = ctx.result("sleepy").unwrap();
    assert_eq!(result.status, StageStatus::Failed);
    assert_eq!(result.retry_count, 1);
    assert!(result.errors.iter().all(|e| e.contains("timed out")));
    assert_eq!(sleepy.call_count(), 2);
}

#[tokio::test]
async fn test_checkpoint_written_after_each_wave() {
    let harness = Harness::new();
    harness.processor("p", RecordingProcessor::new(serde_json::json!(null)));

    let config = PipelineConfig::new("waves")
        .unwrap()
        .with_stage(StageConfig::processor("w1", "p"))
        .with_stage(StageConfig::processor("w2", "p").depends_on(["w1"]))
        .with_stage(StageConfig::processor("w3", "p").depends_on(["w2"]));

    harness.manager().run(&config, "doc-15").await.unwrap();
    assert_eq!(harness.store.save_count(), 3);
}

#[tokio::test]
async fn test_checkpointing_can_be_disabled() {
    let harness = Harness::new();
    harness.processor("p", RecordingProcessor::new(serde_json::json!(null)));

    let config = PipelineConfig::new("no-checkpoints")
        .unwrap()
        .without_checkpoints()
        .with_stage(StageConfig::processor("only", "p"));

    harness.manager().run(&config, "doc-16").await.unwrap();
    assert_eq!(harness.store.save_count(), 0);
}

#[tokio::test]
async fn test_mandatory_checkpoint_failure_fails_run() {
    let harness = Harness::new();
    harness.processor("p", RecordingProcessor::new(serde_json::json!(null)));

    let manager = PipelineManager::new(
        Arc::clone(&harness.registry),
        Arc::clone(&harness.monitor),
        WorkerPool::new(PoolConfig::default()),
        Arc::new(FailingCheckpointStore),
    );

    let config = PipelineConfig::new("mandatory")
        .unwrap()
        .with_mandatory_checkpoints()
        .with_stage(StageConfig::processor("only", "p"));

    let identity = crate::context::RunIdentity::new("doc-17");
    let run_id = identity.run_id;
    let err = manager
        .run_with_identity(&config, identity)
        .await
        .unwrap_err();

    assert!(matches!(err, DocflowError::Checkpoint(_)));
    assert_eq!(manager.run_status(run_id), Some(RunStatus::Failed));
}

#[tokio::test]
async fn test_best_effort_checkpoint_failure_is_tolerated() {
    let harness = Harness::new();
    harness.processor("p", RecordingProcessor::new(serde_json::json!("done")));

    let manager = PipelineManager::new(
        Arc::clone(&harness.registry),
        Arc::clone(&harness.monitor),
        WorkerPool::new(PoolConfig::default()),
        Arc::new(FailingCheckpointStore),
    );

    let config = PipelineConfig::new("best-effort")
        .unwrap()
        .with_stage(StageConfig::processor("only", "p"));

    let ctx = manager.run(&config, "doc-18").await.unwrap();
    assert_eq!(ctx.status(), RunStatus::Completed);
}

#[tokio::test]
async fn test_lifecycle_events_emitted() {
    let harness = Harness::new();
    harness.processor("p", RecordingProcessor::new(serde_json::json!(null)));

    let config = PipelineConfig::new("observed")
        .unwrap()
        .with_stage(StageConfig::processor("only", "p"));

    harness.manager().run(&config, "doc-19").await.unwrap();

    // Emission is detached with a bounded deadline; give it a beat.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let types: Vec<String> = harness.sink.events().into_iter().map(|(t, _)| t).collect();
    assert!(types.contains(&"pipeline.started".to_string()));
    assert!(types.contains(&"stage.started".to_string()));
    assert!(types.contains(&"stage.completed".to_string()));
    assert!(types.contains(&"pipeline.completed".to_string()));

    let (_, payload) = harness.sink.events_of_type("pipeline.completed")[0].clone();
    let payload = payload.unwrap();
    assert_eq!(payload["document_id"], "doc-19");
    assert_eq!(payload["stages"]["only"], "completed");
}

#[tokio::test]
async fn test_status_and_results_queryable_after_terminal_state() {
    let harness = Harness::new();
    harness.processor("good", RecordingProcessor::new(serde_json::json!("usable")));
    harness.processor("bad", RecordingProcessor::always_fatal());

    let config = PipelineConfig::new("queryable")
        .unwrap()
        .with_stage(StageConfig::processor("good", "good"))
        .with_stage(StageConfig::processor("bad", "bad").critical());

    let manager = harness.manager();
    let ctx = manager.run(&config, "doc-20").await.unwrap();
    let run_id = ctx.run_id();

    assert_eq!(manager.run_status(run_id), Some(RunStatus::Failed));

    // Non-critical branch results stay usable after the terminal state.
    let queried = manager.run_context(run_id).unwrap();
    assert_eq!(
        queried.result("good").unwrap().output,
        Some(serde_json::json!("usable"))
    );

    manager.collect_run(run_id).await.unwrap();
    assert_eq!(manager.run_status(run_id), None);
}
