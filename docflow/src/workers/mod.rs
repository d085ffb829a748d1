//! Bounded worker pool with async, thread, and process execution modes.
//!
//! Work items carry a run identifier so an external cancel request can
//! cancel every outstanding item of one run without touching others.
//! Cancellation is cooperative for async and thread work; process-style
//! work gets a grace period and is then abandoned (forced detachment).

use crate::core::ExecutionMode;
use crate::errors::{PoolError, StageError};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

/// What `submit` does when the bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullQueuePolicy {
    /// Wait until a slot frees.
    #[default]
    Block,
    /// Fail immediately with [`PoolError::QueueFull`].
    Reject,
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum queued-plus-running work items.
    pub queue_capacity: usize,
    /// Behavior when the queue is full.
    pub full_policy: FullQueuePolicy,
    /// How long cancelled process-mode work may keep running before it is
    /// abandoned.
    pub process_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            full_policy: FullQueuePolicy::Block,
            process_grace: Duration::from_secs(5),
        }
    }
}

/// Per-item cancellation flag with a wakeup.
#[derive(Debug, Default)]
struct CancelFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        loop {
            // Register the waiter before re-checking the flag, so a cancel
            // landing in between cannot be missed.
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// A detached cancel switch for a single work item.
///
/// Lets the orchestrator cancel an item (e.g. on attempt timeout) after
/// handing the [`WorkHandle`] off to an awaiting future.
#[derive(Debug, Clone)]
pub struct WorkCanceller {
    flag: Arc<CancelFlag>,
}

impl WorkCanceller {
    /// Cancels the item.
    pub fn cancel(&self) {
        self.flag.cancel();
    }
}

/// A future handle to a submitted work item's outcome.
#[derive(Debug)]
pub struct WorkHandle {
    join: tokio::task::JoinHandle<Result<Value, StageError>>,
    flag: Arc<CancelFlag>,
}

impl WorkHandle {
    /// Cancels this item (cooperative; process-mode items get the grace
    /// period before being abandoned).
    pub fn cancel(&self) {
        self.flag.cancel();
    }

    /// Returns a cancel switch usable after this handle is consumed.
    #[must_use]
    pub fn canceller(&self) -> WorkCanceller {
        WorkCanceller {
            flag: Arc::clone(&self.flag),
        }
    }

    /// Awaits the item's outcome.
    pub async fn result(self) -> Result<Value, StageError> {
        match self.join.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => Err(StageError::fatal(format!(
                "worker panicked: {err}"
            ))),
            Err(_) => Err(StageError::cancelled("worker task aborted")),
        }
    }
}

/// A bounded, shared pool executing opaque stage work.
///
/// One pool is shared by every running pipeline unless a caller constructs
/// a per-run pool explicitly.
pub struct WorkerPool {
    config: PoolConfig,
    slots: Arc<Semaphore>,
    runs: DashMap<Uuid, Vec<Arc<CancelFlag>>>,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool with the given configuration.
    #[must_use]
    pub fn new(config: PoolConfig) -> Arc<Self> {
        let capacity = config.queue_capacity.max(1);
        Arc::new(Self {
            config,
            slots: Arc::new(Semaphore::new(capacity)),
            runs: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Submits work tagged with a run, returning a handle to its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::QueueFull`] under the reject policy when no slot
    /// is free, or [`PoolError::Closed`] after shutdown.
    pub async fn submit(
        &self,
        run_id: Uuid,
        label: impl Into<String>,
        mode: ExecutionMode,
        work: BoxFuture<'static, Result<Value, StageError>>,
    ) -> Result<WorkHandle, PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let permit = match self.config.full_policy {
            FullQueuePolicy::Block => self
                .slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PoolError::Closed)?,
            FullQueuePolicy::Reject => {
                self.slots
                    .clone()
                    .try_acquire_owned()
                    .map_err(|_| PoolError::QueueFull {
                        capacity: self.config.queue_capacity,
                    })?
            }
        };

        let label = label.into();
        let flag = Arc::new(CancelFlag::default());
        self.runs.entry(run_id).or_default().push(Arc::clone(&flag));

        let join = match mode {
            ExecutionMode::Async => Self::spawn_async(label, work, Arc::clone(&flag), permit),
            ExecutionMode::Thread => Self::spawn_thread(label, work, permit),
            ExecutionMode::Process => Self::spawn_process(
                label,
                work,
                Arc::clone(&flag),
                self.config.process_grace,
                permit,
            ),
        };

        Ok(WorkHandle { join, flag })
    }

    fn spawn_async(
        label: String,
        work: BoxFuture<'static, Result<Value, StageError>>,
        flag: Arc<CancelFlag>,
        permit: OwnedSemaphorePermit,
    ) -> tokio::task::JoinHandle<Result<Value, StageError>> {
        tokio::spawn(async move {
            let _permit = permit;
            tokio::select! {
                result = work => result,
                () = flag.cancelled() => {
                    debug!(item = %label, "Async work item cancelled");
                    Err(StageError::cancelled("run cancelled"))
                }
            }
        })
    }

    fn spawn_thread(
        label: String,
        work: BoxFuture<'static, Result<Value, StageError>>,
        permit: OwnedSemaphorePermit,
    ) -> tokio::task::JoinHandle<Result<Value, StageError>> {
        tokio::spawn(async move {
            let _permit = permit;
            let inner = tokio::task::spawn_blocking(move || futures::executor::block_on(work));
            match inner.await {
                Ok(result) => result,
                Err(err) => Err(StageError::fatal(format!(
                    "blocking worker for '{label}' failed: {err}"
                ))),
            }
        })
    }

    fn spawn_process(
        label: String,
        work: BoxFuture<'static, Result<Value, StageError>>,
        flag: Arc<CancelFlag>,
        grace: Duration,
        permit: OwnedSemaphorePermit,
    ) -> tokio::task::JoinHandle<Result<Value, StageError>> {
        tokio::spawn(async move {
            let _permit = permit;
            let mut inner = tokio::task::spawn_blocking(move || futures::executor::block_on(work));

            tokio::select! {
                result = &mut inner => match result {
                    Ok(result) => result,
                    Err(err) => Err(StageError::fatal(format!(
                        "process worker for '{label}' failed: {err}"
                    ))),
                },
                () = flag.cancelled() => {
                    // Grace period for the work to wind down on its own.
                    match tokio::time::timeout(grace, &mut inner).await {
                        Ok(Ok(result)) => result,
                        Ok(Err(err)) => Err(StageError::fatal(format!(
                            "process worker for '{label}' failed: {err}"
                        ))),
                        Err(_) => {
                            warn!(item = %label, grace_ms = grace.as_millis() as u64,
                                  "Process work ignored cancellation; abandoning after grace period");
                            Err(StageError::cancelled("terminated after grace period"))
                        }
                    }
                }
            }
        })
    }

    /// Cancels every outstanding item tagged with the run. Returns the
    /// number of items signalled.
    pub fn cancel_run(&self, run_id: Uuid) -> usize {
        match self.runs.remove(&run_id) {
            Some((_, flags)) => {
                for flag in &flags {
                    flag.cancel();
                }
                flags.len()
            }
            None => 0,
        }
    }

    /// Drops cancellation bookkeeping for a finished run.
    pub fn forget_run(&self, run_id: Uuid) {
        self.runs.remove(&run_id);
    }

    /// Returns the number of free queue slots.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Closes the pool; subsequent submissions fail with [`PoolError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.slots.close();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.config.queue_capacity)
            .field("available", &self.available_slots())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
