//! Event sink trait and implementations.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Level};

/// Lifecycle event names emitted by the orchestrator.
pub mod names {
    /// A run entered RUNNING.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// A run completed all waves.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A run failed on a critical stage.
    pub const PIPELINE_FAILED: &str = "pipeline.failed";
    /// A run honored an external cancel request.
    pub const PIPELINE_CANCELLED: &str = "pipeline.cancelled";
    /// A stage was submitted to the worker pool.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage reached Completed.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage reached Failed.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A stage reached Skipped.
    pub const STAGE_SKIPPED: &str = "stage.skipped";
}

/// Trait for sinks that receive orchestrator events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Emits an event without blocking. Must never panic; errors are
    /// logged and suppressed.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// Emits to a sink with a bounded deadline, detached from the caller.
///
/// A slow or wedged sink can therefore never stall wave progression; the
/// event is dropped (with a warning) once the deadline passes.
pub fn emit_bounded(
    sink: &Arc<dyn EventSink>,
    event_type: &str,
    data: Option<serde_json::Value>,
    deadline: Duration,
) {
    let sink = Arc::clone(sink);
    let event_type = event_type.to_string();
    tokio::spawn(async move {
        if tokio::time::timeout(deadline, sink.emit(&event_type, data))
            .await
            .is_err()
        {
            warn!(event_type = %event_type, deadline_ms = deadline.as_millis() as u64,
                  "Event sink missed deadline; event dropped");
        }
    });
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// An event sink that logs events through the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: &Option<serde_json::Value>) {
        if self.level == Level::DEBUG {
            debug!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
        } else {
            info!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, &data);
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, &data);
    }
}

/// A collecting event sink for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events whose type starts with the given prefix.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

/// A sink that sleeps before delivering, for exercising bounded emission.
#[cfg(test)]
pub struct SlowEventSink {
    delay: Duration,
    delivered: Arc<CollectingEventSink>,
}

#[cfg(test)]
impl SlowEventSink {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            delivered: Arc::new(CollectingEventSink::new()),
        }
    }

    pub fn delivered(&self) -> Arc<CollectingEventSink> {
        Arc::clone(&self.delivered)
    }
}

#[cfg(test)]
#[async_trait]
impl EventSink for SlowEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        tokio::time::sleep(self.delay).await;
        self.delivered.emit(event_type, data).await;
    }

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}
