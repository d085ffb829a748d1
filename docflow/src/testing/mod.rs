//! Mock processors, samplers, and stores for exercising orchestration.

use crate::checkpoint::CheckpointStore;
use crate::context::StageContext;
use crate::core::StageResult;
use crate::errors::{CheckpointError, StageError};
use crate::processors::Processor;
use crate::resources::{Utilization, UtilizationSampler};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// A processor that records invocations and plays back a scripted outcome.
pub struct RecordingProcessor {
    output: serde_json::Value,
    calls: AtomicU32,
    /// Transient failures to produce before succeeding.
    fail_first: AtomicU32,
    /// When set, every call fails with this error.
    always_fail: Option<StageError>,
    delay: Option<Duration>,
}

impl RecordingProcessor {
    /// Succeeds immediately with the given output.
    #[must_use]
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            calls: AtomicU32::new(0),
            fail_first: AtomicU32::new(0),
            always_fail: None,
            delay: None,
        }
    }

    /// Fails transiently `n` times, then succeeds.
    #[must_use]
    pub fn failing_first(output: serde_json::Value, n: u32) -> Self {
        let processor = Self::new(output);
        processor.fail_first.store(n, Ordering::SeqCst);
        processor
    }

    /// Fails every call with a transient error.
    #[must_use]
    pub fn always_failing() -> Self {
        Self {
            always_fail: Some(StageError::execution("scripted transient failure")),
            ..Self::new(serde_json::Value::Null)
        }
    }

    /// Fails every call with a non-transient error.
    #[must_use]
    pub fn always_fatal() -> Self {
        Self {
            always_fail: Some(StageError::fatal("scripted fatal failure")),
            ..Self::new(serde_json::Value::Null)
        }
    }

    /// Sleeps (async) before producing the outcome.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns how many times the processor was invoked.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    async fn process(&self, _ctx: &StageContext) -> Result<serde_json::Value, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(ref err) = self.always_fail {
            return Err(err.clone());
        }

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(StageError::execution(format!(
                "scripted failure ({remaining} remaining)"
            )));
        }

        Ok(self.output.clone())
    }
}

/// A sampler that replays a scripted utilization sequence.
///
/// Once the script is exhausted, the final reading repeats.
pub struct ScriptedSampler {
    script: Mutex<Vec<Utilization>>,
    fallback: Mutex<Utilization>,
}

impl ScriptedSampler {
    /// Always reports the same reading.
    #[must_use]
    pub fn constant(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            fallback: Mutex::new(Utilization::new(cpu_percent, memory_percent)),
        }
    }

    /// Replays the given readings in order, then repeats the last.
    #[must_use]
    pub fn sequence(readings: Vec<Utilization>) -> Self {
        let fallback = readings.last().cloned().unwrap_or_default();
        let mut script = readings;
        script.reverse(); // pop from the back in order
        Self {
            script: Mutex::new(script),
            fallback: Mutex::new(fallback),
        }
    }
}

impl UtilizationSampler for ScriptedSampler {
    fn sample(&self) -> Utilization {
        match self.script.lock().pop() {
            Some(reading) => {
                *self.fallback.lock() = reading.clone();
                reading
            }
            None => self.fallback.lock().clone(),
        }
    }
}

/// A checkpoint store that fails every write.
#[derive(Debug, Default)]
pub struct FailingCheckpointStore;

#[async_trait]
impl CheckpointStore for FailingCheckpointStore {
    async fn save(
        &self,
        run_id: Uuid,
        _results: &HashMap<String, StageResult>,
    ) -> Result<(), CheckpointError> {
        Err(CheckpointError::Save {
            run_id,
            reason: "scripted write failure".to_string(),
        })
    }

    async fn load(
        &self,
        _run_id: Uuid,
    ) -> Result<Option<HashMap<String, StageResult>>, CheckpointError> {
        Ok(None)
    }

    async fn remove(&self, _run_id: Uuid) -> Result<(), CheckpointError> {
        Ok(())
    }
}

/// A checkpoint store that counts saves while delegating to memory.
#[derive(Debug, Default)]
pub struct CountingCheckpointStore {
    inner: crate::checkpoint::InMemoryCheckpointStore,
    saves: AtomicU32,
}

impl CountingCheckpointStore {
    /// Creates a new store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of save calls.
    #[must_use]
    pub fn save_count(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for CountingCheckpointStore {
    async fn save(
        &self,
        run_id: Uuid,
        results: &HashMap<String, StageResult>,
    ) -> Result<(), CheckpointError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(run_id, results).await
    }

    async fn load(
        &self,
        run_id: Uuid,
    ) -> Result<Option<HashMap<String, StageResult>>, CheckpointError> {
        self.inner.load(run_id).await
    }

    async fn remove(&self, run_id: Uuid) -> Result<(), CheckpointError> {
        self.inner.remove(run_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PipelineContext, RunIdentity, StageInputs};
    use std::sync::Arc;

    fn ctx() -> StageContext {
        let pipeline_ctx = Arc::new(PipelineContext::new(RunIdentity::new("doc"), "test"));
        StageContext::new(pipeline_ctx, "s", StageInputs::default())
    }

    #[tokio::test]
    async fn test_recording_processor_counts() {
        let processor = RecordingProcessor::new(serde_json::json!(1));
        assert_eq!(processor.call_count(), 0);
        let _ = processor.process(&ctx()).await;
        let _ = processor.process(&ctx()).await;
        assert_eq!(processor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_first_then_succeeds() {
        let processor = RecordingProcessor::failing_first(serde_json::json!("ok"), 2);

        assert!(processor.process(&ctx()).await.is_err());
        assert!(processor.process(&ctx()).await.is_err());
        assert_eq!(processor.process(&ctx()).await.unwrap(), serde_json::json!("ok"));
    }

    #[test]
    fn test_scripted_sampler_repeats_last() {
        let sampler = ScriptedSampler::sequence(vec![
            Utilization::new(10.0, 10.0),
            Utilization::new(95.0, 50.0),
        ]);

        assert!((sampler.sample().cpu_percent - 10.0).abs() < f64::EPSILON);
        assert!((sampler.sample().cpu_percent - 95.0).abs() < f64::EPSILON);
        assert!((sampler.sample().cpu_percent - 95.0).abs() < f64::EPSILON);
    }
}
