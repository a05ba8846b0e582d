//! Workflow Instances
//!
//! A running (or finished) instantiation of a template: shared context,
//! runtime step records, a forward-only cursor, and execution metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::Context;
use super::model::{participating_capabilities, Step};
use super::state::Checkpoint;

/// Lifecycle status of a workflow instance.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Paused,
    Retrying,
}

impl WorkflowStatus {
    /// Completed, Failed and Cancelled instances are never mutated again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
            Self::Retrying => "retrying",
        };
        f.write_str(label)
    }
}

/// Execution counters and derived timings for an instance.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WorkflowMetrics {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub retry_count: u32,
    /// Seconds between start and end of the run
    pub total_execution_time: f64,
    /// Seconds per completed step
    pub average_step_time: f64,
    /// Failed steps over total steps
    pub error_rate: f64,
}

impl WorkflowMetrics {
    pub fn new(total_steps: usize) -> Self {
        Self {
            total_steps,
            ..Self::default()
        }
    }

    /// Steps that reached a terminal status.
    pub fn visited_steps(&self) -> usize {
        self.completed_steps + self.failed_steps + self.skipped_steps
    }

    /// Recomputes the derived figures from the counters and total time.
    pub fn finalize(&mut self, total_execution_time: f64) {
        self.total_execution_time = total_execution_time;
        self.average_step_time = if self.completed_steps > 0 {
            total_execution_time / self.completed_steps as f64
        } else {
            0.0
        };
        self.error_rate = if self.total_steps > 0 {
            self.failed_steps as f64 / self.total_steps as f64
        } else {
            0.0
        };
    }
}

/// A workflow instance.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkflowInstance {
    pub id: String,

    /// `None` for ad-hoc workflows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,

    pub participating_capabilities: Vec<String>,

    pub context: Context,

    pub steps: Vec<Step>,

    pub status: WorkflowStatus,

    pub current_step_index: usize,

    pub metrics: WorkflowMetrics,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl WorkflowInstance {
    /// Creates a Pending instance over fresh runtime copies of `steps`.
    pub fn new(template_id: Option<String>, steps: &[Step], context: Context) -> Self {
        let steps: Vec<Step> = steps.iter().map(Step::to_runtime).collect();
        Self {
            id: Uuid::new_v4().to_string(),
            template_id,
            participating_capabilities: participating_capabilities(&steps),
            context,
            metrics: WorkflowMetrics::new(steps.len()),
            steps,
            status: WorkflowStatus::Pending,
            current_step_index: 0,
            checkpoint: None,
            start_time: None,
            end_time: None,
            error_message: None,
        }
    }

    /// Gets a step by ID.
    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Returns true once the cursor has passed the last step.
    pub fn is_exhausted(&self) -> bool {
        self.current_step_index >= self.steps.len()
    }

    /// Moves the cursor forward by one step.
    pub fn advance(&mut self) {
        if self.current_step_index < self.steps.len() {
            self.current_step_index += 1;
        }
    }

    /// Records the end of the run and derives timing metrics.
    pub fn finish(&mut self, status: WorkflowStatus) {
        let end = Utc::now();
        self.status = status;
        self.end_time = Some(end);
        let elapsed = self
            .start_time
            .map(|start| (end - start).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        self.metrics.finalize(elapsed);
    }
}
