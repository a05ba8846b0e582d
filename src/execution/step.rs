//! Individual Step Execution
//!
//! Runs one step against its bound capability:
//! - Input assembly (`parameters` overlaid by the instance context)
//! - Per-attempt timeout
//! - Retries with the step's backoff strategy
//! - Result type checking against the declared `result_kind`

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, warn};
use serde_json::Value;
use tokio::time::{sleep, timeout};

use crate::capability::CommandTable;
use crate::error::{CapabilityError, OrchestrationError};
use crate::workflow::{StepStatus, WorkflowInstance, WorkflowStatus};

/// Executes steps of a workflow instance.
#[derive(Clone, Debug)]
pub struct StepExecutor {
    commands: Arc<CommandTable>,
}

impl StepExecutor {
    pub fn new(commands: Arc<CommandTable>) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &Arc<CommandTable> {
        &self.commands
    }

    /// Executes the step at `index`, applying its timeout and retry policy.
    ///
    /// Leaves the step in `InProgress` on return; the caller records the
    /// terminal status. `step.retry_count` and `metrics.retry_count` are
    /// incremented for every attempt beyond the first, and the step (and
    /// instance) sit in `Retrying` while waiting out the backoff delay.
    ///
    /// # Errors
    ///
    /// * `CapabilityUnavailable` - the operation is not bound; never retried
    /// * `StepTimeout` - the last attempt exceeded `timeout_seconds`
    /// * `StepExecution` - the last attempt failed or returned the wrong type
    pub async fn execute(
        &self,
        instance: &mut WorkflowInstance,
        index: usize,
    ) -> Result<Value, OrchestrationError> {
        let instance_id = instance.id.clone();
        let input = instance.steps[index].parameters.merged(&instance.context);
        let step = &mut instance.steps[index];

        step.reset();
        step.start_time = Some(Utc::now());

        let policy = step.retry_policy.clone();
        let mut last_error = None;

        for attempt in 0..policy.max_attempts() {
            if attempt > 0 {
                let delay = policy.delay(attempt - 1);
                step.status = StepStatus::Retrying;
                step.retry_count += 1;
                instance.status = WorkflowStatus::Retrying;
                instance.metrics.retry_count += 1;

                warn!(
                    "[{}] Retrying step '{}' (attempt {}/{}) in {:?}",
                    instance_id,
                    step.id,
                    attempt + 1,
                    policy.max_attempts(),
                    delay
                );
                sleep(delay).await;
            }

            step.status = StepStatus::InProgress;
            instance.status = WorkflowStatus::InProgress;
            debug!(
                "[{}] Invoking {}.{} for step '{}'",
                instance_id, step.capability, step.operation, step.id
            );

            let call = self
                .commands
                .invoke(&step.capability, &step.operation, input.clone());

            let err = match timeout(policy.timeout(), call).await {
                Ok(Ok(value)) if step.result_kind.matches(&value) => return Ok(value),
                Ok(Ok(value)) => OrchestrationError::StepExecution {
                    step_id: step.id.clone(),
                    reason: format!(
                        "expected a {:?} result, got {}",
                        step.result_kind,
                        value_kind(&value)
                    ),
                },
                Ok(Err(CapabilityError::Unavailable { capability, operation })) => {
                    error!(
                        "[{}] Step '{}': capability '{}' has no operation '{}'",
                        instance_id, step.id, capability, operation
                    );
                    return Err(OrchestrationError::CapabilityUnavailable { capability, operation });
                }
                Ok(Err(e)) => OrchestrationError::StepExecution {
                    step_id: step.id.clone(),
                    reason: e.to_string(),
                },
                Err(_) => OrchestrationError::StepTimeout {
                    step_id: step.id.clone(),
                    timeout_secs: policy.timeout_seconds,
                },
            };

            warn!("[{}] Attempt {} of step '{}' failed: {}", instance_id, attempt + 1, step.id, err);
            last_error = Some(err);
        }

        Err(last_error.unwrap_or_else(|| OrchestrationError::StepExecution {
            step_id: step.id.clone(),
            reason: "no attempts were made".to_string(),
        }))
    }
}

/// Short name of a JSON value's type, for error messages.
fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
