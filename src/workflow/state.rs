//! Workflow Checkpoints
//!
//! Snapshots of a running instance taken after every step, enabling
//! resume after interruption.
//!
//! A checkpoint stores the cursor of the next step to run, so resuming
//! re-enters the loop at the step that was in flight when the process died
//! and never re-executes a step recorded as finished.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::Context;
use super::instance::{WorkflowInstance, WorkflowMetrics, WorkflowStatus};
use super::model::StepStatus;

/// Runtime state of one step as recorded in a checkpoint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StepSnapshot {
    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Persistent snapshot of a workflow instance.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Checkpoint {
    /// Index of the next step to execute
    pub current_step_index: usize,

    pub context: Context,

    /// Results of steps that produced one, keyed by step id
    pub results: IndexMap<String, Value>,

    pub steps: IndexMap<String, StepSnapshot>,

    pub metrics: WorkflowMetrics,

    pub status: WorkflowStatus,

    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    /// Captures the instance's state with the cursor set to `resume_index`.
    pub fn capture(instance: &WorkflowInstance, resume_index: usize) -> Self {
        let results = instance
            .steps
            .iter()
            .filter_map(|s| s.result.as_ref().map(|r| (s.id.clone(), r.clone())))
            .collect();

        let steps = instance
            .steps
            .iter()
            .map(|s| {
                (
                    s.id.clone(),
                    StepSnapshot {
                        status: s.status,
                        error: s.error.clone(),
                        retry_count: s.retry_count,
                        start_time: s.start_time,
                        end_time: s.end_time,
                    },
                )
            })
            .collect();

        Self {
            current_step_index: resume_index.min(instance.steps.len()),
            context: instance.context.clone(),
            results,
            steps,
            metrics: instance.metrics.clone(),
            status: instance.status,
            timestamp: Utc::now(),
        }
    }

}

impl WorkflowInstance {
    /// Snapshots the instance and stores the checkpoint on it.
    pub fn create_checkpoint(&mut self, resume_index: usize) -> &Checkpoint {
        let checkpoint = Checkpoint::capture(self, resume_index);
        self.checkpoint.insert(checkpoint)
    }

    /// Rewinds the instance to its stored checkpoint.
    ///
    /// This is the only operation that may move `current_step_index`
    /// backward. Steps absent from the snapshot are reset to Pending.
    pub fn restore_from_checkpoint(&mut self) -> Result<(), String> {
        let checkpoint = self
            .checkpoint
            .clone()
            .ok_or_else(|| format!("workflow '{}' has no checkpoint", self.id))?;

        self.current_step_index = checkpoint.current_step_index.min(self.steps.len());
        self.context = checkpoint.context.clone();
        self.metrics = checkpoint.metrics.clone();
        self.status = checkpoint.status;

        for step in &mut self.steps {
            match checkpoint.steps.get(&step.id) {
                Some(snapshot) => {
                    step.status = snapshot.status;
                    step.error = snapshot.error.clone();
                    step.retry_count = snapshot.retry_count;
                    step.start_time = snapshot.start_time;
                    step.end_time = snapshot.end_time;
                    step.result = checkpoint.results.get(&step.id).cloned();
                }
                None => step.reset(),
            }
        }

        Ok(())
    }

    /// Serializes the instance, checkpoint included, for a checkpoint store.
    pub fn to_blob(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Inverse of [`WorkflowInstance::to_blob`].
    pub fn from_blob(blob: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::context::step_result_key;
    use crate::workflow::model::Step;
    use serde_json::json;

    fn running_instance() -> WorkflowInstance {
        let steps = vec![
            Step::new("s1", "market", "analyze"),
            Step::new("s2", "content", "write").depends_on("s1"),
            Step::new("s3", "executive", "approve").depends_on("s2"),
        ];
        let mut instance =
            WorkflowInstance::new(Some("t".to_string()), &steps, Context::from_pairs([("sku", json!("A"))]));
        instance.status = WorkflowStatus::InProgress;
        instance.steps[0].status = StepStatus::Completed;
        instance.steps[0].result = Some(json!({"demand": "high"}));
        instance
            .context
            .insert(step_result_key("s1"), json!({"demand": "high"}));
        instance.metrics.completed_steps = 1;
        instance.current_step_index = 1;
        instance
    }

    #[test]
    fn test_checkpoint_roundtrip_restores_state() {
        let mut instance = running_instance();
        let original_ctx = instance.context.clone();
        let original_metrics = instance.metrics.clone();
        instance.create_checkpoint(1);

        // Progress past the checkpoint, then rewind.
        instance.steps[1].status = StepStatus::Completed;
        instance.steps[1].result = Some(json!("copy"));
        instance.context.insert("extra", json!(true));
        instance.metrics.completed_steps = 2;
        instance.current_step_index = 2;

        instance.restore_from_checkpoint().unwrap();

        assert_eq!(instance.current_step_index, 1);
        assert_eq!(instance.context, original_ctx);
        assert_eq!(instance.metrics, original_metrics);
        assert_eq!(instance.steps[1].status, StepStatus::Pending);
        assert!(instance.steps[1].result.is_none());
        assert_eq!(instance.steps[0].result, Some(json!({"demand": "high"})));
    }

    #[test]
    fn test_blob_roundtrip_keeps_checkpoint() {
        let mut instance = running_instance();
        instance.create_checkpoint(1);

        let blob = instance.to_blob().unwrap();
        let mut loaded = WorkflowInstance::from_blob(&blob).unwrap();
        loaded.restore_from_checkpoint().unwrap();

        assert_eq!(loaded.id, instance.id);
        assert_eq!(loaded.current_step_index, 1);
        assert_eq!(loaded.context, instance.context);
        assert_eq!(loaded.metrics, instance.metrics);
        assert_eq!(loaded.steps[0].status, StepStatus::Completed);
    }

    #[test]
    fn test_restore_without_checkpoint_fails() {
        let mut instance = running_instance();
        let err = instance.restore_from_checkpoint().unwrap_err();
        assert!(err.contains("no checkpoint"));
    }

    #[test]
    fn test_capture_clamps_cursor() {
        let instance = running_instance();
        let checkpoint = Checkpoint::capture(&instance, 99);
        assert_eq!(checkpoint.current_step_index, 3);
    }

    #[test]
    fn test_capture_collects_results() {
        let instance = running_instance();
        let checkpoint = Checkpoint::capture(&instance, 1);
        assert_eq!(checkpoint.results.len(), 1);
        assert!(checkpoint.results.contains_key("s1"));
        assert_eq!(checkpoint.steps.len(), 3);
    }
}
