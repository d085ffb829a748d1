//! Run identity for tracking pipeline executions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a single pipeline run over a single document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The unique ID for this run.
    pub run_id: Uuid,

    /// The document the run processes.
    pub document_id: String,

    /// Optional request-scoped correlation ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl RunIdentity {
    /// Creates a new identity with a generated run ID.
    #[must_use]
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            document_id: document_id.into(),
            request_id: None,
        }
    }

    /// Creates an identity with a specific run ID (used for resume).
    #[must_use]
    pub fn with_run_id(document_id: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            run_id,
            document_id: document_id.into(),
            request_id: None,
        }
    }

    /// Sets the request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }
}
