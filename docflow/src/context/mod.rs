//! Context management for pipeline execution.
//!
//! This module provides:
//! - Run identity (run ID + document ID)
//! - The mutable per-run context owned by the pipeline manager
//! - Strictness-enforced stage input views

mod execution;
mod identity;
mod inputs;

pub use execution::{PipelineContext, StageContext};
pub use identity::RunIdentity;
pub use inputs::{StageInputs, UndeclaredDependency};
