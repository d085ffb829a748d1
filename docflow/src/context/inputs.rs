//! Stage inputs with declared-dependency enforcement.

use crate::errors::StageError;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Error raised when a stage reads an output it never declared a dependency on.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' accessed '{dependency}' which is not a declared dependency")]
pub struct UndeclaredDependency {
    /// The stage attempting access.
    pub stage: String,
    /// The undeclared upstream name.
    pub dependency: String,
}

impl From<UndeclaredDependency> for StageError {
    fn from(err: UndeclaredDependency) -> Self {
        // A stage reaching past its declaration is a coding error, not a blip.
        StageError::fatal(err.to_string())
    }
}

/// An immutable view of upstream stage outputs.
///
/// In strict mode (the default for orchestrated stages), reading an
/// undeclared dependency is an error rather than a silent `None`.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    outputs: HashMap<String, Value>,
    declared: HashSet<String>,
    stage_name: String,
    strict: bool,
}

impl StageInputs {
    /// Creates strict inputs for an orchestrated stage.
    #[must_use]
    pub fn new(
        outputs: HashMap<String, Value>,
        declared: HashSet<String>,
        stage_name: impl Into<String>,
    ) -> Self {
        Self {
            outputs,
            declared,
            stage_name: stage_name.into(),
            strict: true,
        }
    }

    /// Creates permissive inputs (every available output is readable).
    #[must_use]
    pub fn permissive(outputs: HashMap<String, Value>, stage_name: impl Into<String>) -> Self {
        Self {
            declared: outputs.keys().cloned().collect(),
            outputs,
            stage_name: stage_name.into(),
            strict: false,
        }
    }

    /// Gets the output of an upstream stage.
    ///
    /// # Errors
    ///
    /// Returns [`UndeclaredDependency`] in strict mode if `stage` was not
    /// declared as a dependency.
    pub fn get(&self, stage: &str) -> Result<Option<&Value>, UndeclaredDependency> {
        if self.strict && !self.declared.contains(stage) {
            return Err(UndeclaredDependency {
                stage: self.stage_name.clone(),
                dependency: stage.to_string(),
            });
        }
        Ok(self.outputs.get(stage))
    }

    /// Gets an upstream output without the strictness check.
    #[must_use]
    pub fn get_unchecked(&self, stage: &str) -> Option<&Value> {
        self.outputs.get(stage)
    }

    /// Returns true if an output exists for the given stage.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.outputs.contains_key(stage)
    }

    /// Returns the names of all available upstream outputs.
    #[must_use]
    pub fn stages(&self) -> Vec<&String> {
        self.outputs.keys().collect()
    }

    /// Returns the declared dependencies of the consuming stage.
    #[must_use]
    pub fn declared_dependencies(&self) -> &HashSet<String> {
        &self.declared
    }
}
