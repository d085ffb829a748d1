//! # Docflow
//!
//! A document-processing pipeline orchestrator.
//!
//! Docflow executes a declared, dependency-ordered set of processing stages
//! over a document, under concurrency and resource limits, with failure
//! recovery and resumability:
//!
//! - **Wave scheduling**: a validated dependency graph is grouped into
//!   waves; stages within a wave run concurrently, waves run in order
//! - **Stage variants**: processors, validators, routers (dynamic branch
//!   pruning), and aggregators
//! - **Resource-aware admission**: utilization sampling with hysteresis
//!   throttling defers work under pressure instead of dropping it
//! - **Retry and timeout policy**: exponential backoff for transient
//!   failures, per-attempt deadlines
//! - **Crash-safe checkpoints**: per-wave result batches enable resume
//!   without re-executing finished work
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docflow::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(ProcessorRegistry::new());
//! registry.register("extract_text", Arc::new(MyExtractor::new()));
//!
//! let config = PipelineConfig::new("ingest")?
//!     .with_stage(StageConfig::processor("extract", "extract_text").critical())
//!     .with_stage(StageConfig::processor("ocr", "ocr_pages").depends_on(["extract"]));
//!
//! let manager = PipelineManager::new(registry, monitor, pool, checkpoints);
//! let ctx = manager.run(&config, "document-42").await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod checkpoint;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod pipeline;
pub mod processors;
pub mod resources;
pub mod stages;
pub mod testing;
pub mod utils;
pub mod workers;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checkpoint::{
        Checkpoint, CheckpointStore, InMemoryCheckpointStore, JsonCheckpointStore,
    };
    pub use crate::context::{PipelineContext, RunIdentity, StageContext, StageInputs};
    pub use crate::core::{ExecutionMode, RunStatus, StageKind, StageResult, StageStatus};
    pub use crate::errors::{
        CheckpointError, ConfigError, DocflowError, PoolError, ResourceError, StageError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        BackoffStrategy, ExecutionGraph, JitterStrategy, ManagerConfig, PipelineConfig,
        PipelineManager, RetryConfig, StageConfig,
    };
    pub use crate::processors::{FnProcessor, Processor, ProcessorRegistry};
    pub use crate::resources::{
        MonitorConfig, ResourceLimits, ResourceMonitor, Utilization, UtilizationSampler,
    };
    pub use crate::stages::{
        AggregatorStage, Merge, ProcessorStage, Route, RouteDecision, RouterStage, Stage,
        Validate, ValidationIssue, ValidationReport, ValidatorStage,
    };
    pub use crate::workers::{FullQueuePolicy, PoolConfig, WorkerPool};
}
