//! Error Types
//!
//! Caller-facing errors for the orchestration engine and the typed errors
//! returned across its external boundaries (capabilities, checkpoint store,
//! notification sink).

use thiserror::Error;

/// Errors surfaced by the orchestration engine.
///
/// Step-level failures (`StepTimeout`, `StepExecution`, `CapabilityUnavailable`)
/// are normally demoted to a `Failed` step status and only reach the caller
/// when wrapped in `CriticalStepFailure`.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Step '{step_id}' skipped: dependency '{dependency}' is not completed")]
    DependencyUnmet { step_id: String, dependency: String },

    #[error("Step '{step_id}' timed out after {timeout_secs}s")]
    StepTimeout { step_id: String, timeout_secs: u64 },

    #[error("Step '{step_id}' failed: {reason}")]
    StepExecution { step_id: String, reason: String },

    #[error("Capability '{capability}' does not provide operation '{operation}'")]
    CapabilityUnavailable { capability: String, operation: String },

    #[error("Critical step '{step_id}' failed: {reason}")]
    CriticalStepFailure { step_id: String, reason: String },

    #[error("Handoff '{handoff_id}' failed: {reason}")]
    HandoffFailure { handoff_id: String, reason: String },

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template already registered: {0}")]
    DuplicateTemplate(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow is already running: {0}")]
    WorkflowRunning(String),

    #[error("Workflow {instance_id} is already {status}")]
    WorkflowFinished { instance_id: String, status: String },

    #[error("Cannot resume workflow '{instance_id}': {reason}")]
    ResumeFailed { instance_id: String, reason: String },
}

/// Errors returned by capability handlers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    #[error("capability '{capability}' has no operation '{operation}'")]
    Unavailable { capability: String, operation: String },

    #[error("{0}")]
    Failed(String),
}

impl CapabilityError {
    /// Shorthand for a plain handler failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Errors raised by a checkpoint store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint backend error: {0}")]
    Backend(String),

    #[error("instance id '{0}' cannot be used as a checkpoint key")]
    InvalidKey(String),
}

/// Errors raised by a notification sink.
#[derive(Debug, Error)]
#[error("notification sink error: {0}")]
pub struct SinkError(pub String);

pub type Result<T> = std::result::Result<T, OrchestrationError>;
