//! Crash-safe checkpoint persistence for resumable runs.
//!
//! A checkpoint is the accumulated stage-result map of one run, written as
//! an atomic batch after each wave completes. Resume only consults it to
//! skip already-completed stages; partial waves are never replayed from it.
//! Stores are keyed by run identifier and safe for concurrent writers
//! across distinct runs, with last-write-wins semantics within a run.

use crate::core::StageResult;
use crate::errors::CheckpointError;
use crate::utils::iso_timestamp;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// The persisted form of one run's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The run the snapshot belongs to.
    pub run_id: Uuid,
    /// When the batch was written (ISO 8601).
    pub saved_at: String,
    /// Stage name to recorded result.
    pub results: HashMap<String, StageResult>,
}

/// Persistence interface for checkpoints. The backing store is external.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persists the run's accumulated results as one atomic batch.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Save`] if the batch cannot be written.
    async fn save(
        &self,
        run_id: Uuid,
        results: &HashMap<String, StageResult>,
    ) -> Result<(), CheckpointError>;

    /// Loads the run's latest checkpoint, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Load`] if a stored checkpoint cannot be read.
    async fn load(
        &self,
        run_id: Uuid,
    ) -> Result<Option<HashMap<String, StageResult>>, CheckpointError>;

    /// Discards the run's checkpoint (garbage collection of finished runs).
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Save`] if the removal fails.
    async fn remove(&self, run_id: Uuid) -> Result<(), CheckpointError>;
}

/// An in-memory store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: DashMap<Uuid, Checkpoint>,
}

impl InMemoryCheckpointStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored checkpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    /// Returns true if no checkpoint is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        run_id: Uuid,
        results: &HashMap<String, StageResult>,
    ) -> Result<(), CheckpointError> {
        self.checkpoints.insert(
            run_id,
            Checkpoint {
                run_id,
                saved_at: iso_timestamp(),
                results: results.clone(),
            },
        );
        Ok(())
    }

    async fn load(
        &self,
        run_id: Uuid,
    ) -> Result<Option<HashMap<String, StageResult>>, CheckpointError> {
        Ok(self
            .checkpoints
            .get(&run_id)
            .map(|entry| entry.results.clone()))
    }

    async fn remove(&self, run_id: Uuid) -> Result<(), CheckpointError> {
        self.checkpoints.remove(&run_id);
        Ok(())
    }
}

/// A JSON-file store: one file per run under a base directory.
///
/// Batches are written to a temporary sibling and renamed into place, so a
/// reader never observes a torn checkpoint.
#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    dir: PathBuf,
}

impl JsonCheckpointStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    fn save_err(run_id: Uuid, reason: impl std::fmt::Display) -> CheckpointError {
        CheckpointError::Save {
            run_id,
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl CheckpointStore for JsonCheckpointStore {
    async fn save(
        &self,
        run_id: Uuid,
        results: &HashMap<String, StageResult>,
    ) -> Result<(), CheckpointError> {
        let checkpoint = Checkpoint {
            run_id,
            saved_at: iso_timestamp(),
            results: results.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&checkpoint)
            .map_err(|e| Self::save_err(run_id, e))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::save_err(run_id, e))?;

        let path = self.path_for(run_id);
        let tmp = self.dir.join(format!("{run_id}.json.tmp"));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Self::save_err(run_id, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Self::save_err(run_id, e))?;

        Ok(())
    }

    async fn load(
        &self,
        run_id: Uuid,
    ) -> Result<Option<HashMap<String, StageResult>>, CheckpointError> {
        let path = self.path_for(run_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(CheckpointError::Load {
                    run_id,
                    reason: err.to_string(),
                })
            }
        };

        let checkpoint: Checkpoint =
            serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Load {
                run_id,
                reason: e.to_string(),
            })?;
        Ok(Some(checkpoint.results))
    }

    async fn remove(&self, run_id: Uuid) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(self.path_for(run_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::save_err(run_id, err)),
        }
    }
}
