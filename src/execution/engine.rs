//! Workflow Execution Engine
//!
//! The loop that drives one workflow instance to completion:
//! - Strictly sequential walk over the steps in template order
//! - Dependency gating (unmet dependencies skip the step)
//! - Step execution with retry and timeout
//! - A checkpoint after every step for crash recovery
//! - Cooperative cancel/pause via [`RunControl`]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};

use crate::capability::CommandTable;
use crate::error::OrchestrationError;
use crate::monitoring::{notify, NotificationSink, WorkflowEvent};
use crate::storage::CheckpointStore;
use crate::workflow::{step_result_key, StepStatus, WorkflowInstance, WorkflowStatus};

use super::gate::check_dependencies;
use super::step::StepExecutor;

/// Cooperative cancel/pause flags for a running instance.
///
/// The engine checks the flags at the top of each loop iteration; a
/// capability call already in flight is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancelled: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation before the next step starts.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Requests a pause before the next step starts.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Workflow execution engine.
///
/// Owns no workflow state itself; each call to [`Engine::run`] drives the
/// instance it is handed. Many instances may be driven concurrently from
/// separate tasks sharing one engine.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sellerflow::capability::CommandTable;
/// use sellerflow::execution::{Engine, RunControl};
/// use sellerflow::monitoring::LogSink;
/// use sellerflow::storage::InMemoryCheckpointStore;
/// use sellerflow::workflow::{Context, Step, WorkflowInstance};
///
/// # async fn demo(commands: CommandTable) {
/// let engine = Engine::new(
///     Arc::new(commands),
///     Arc::new(InMemoryCheckpointStore::new()),
///     Arc::new(LogSink),
/// );
/// let steps = vec![Step::new("research", "market", "analyze_market")];
/// let mut instance = WorkflowInstance::new(None, &steps, Context::new());
/// let status = engine.run(&mut instance, &RunControl::new()).await;
/// println!("finished as {}", status);
/// # }
/// ```
#[derive(Clone)]
pub struct Engine {
    executor: StepExecutor,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn NotificationSink>,
}

impl Engine {
    pub fn new(
        commands: Arc<CommandTable>,
        store: Arc<dyn CheckpointStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            executor: StepExecutor::new(commands),
            store,
            sink,
        }
    }

    pub fn commands(&self) -> &Arc<CommandTable> {
        self.executor.commands()
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn sink(&self) -> &Arc<dyn NotificationSink> {
        &self.sink
    }

    /// Drives `instance` until every step is visited, a critical step fails,
    /// or `control` asks it to stop. Returns the resulting status.
    ///
    /// Instances already in a terminal status are returned untouched.
    pub async fn run(&self, instance: &mut WorkflowInstance, control: &RunControl) -> WorkflowStatus {
        if instance.status.is_terminal() {
            warn!(
                "Workflow {} is already {}; not running it again",
                instance.id, instance.status
            );
            return instance.status;
        }

        if instance.start_time.is_none() {
            instance.start_time = Some(Utc::now());
        }
        self.set_status(instance, WorkflowStatus::InProgress).await;

        info!(
            "Starting workflow {} at step {}/{} (capabilities: {:?})",
            instance.id,
            instance.current_step_index,
            instance.steps.len(),
            instance.participating_capabilities
        );

        while !instance.is_exhausted() {
            let index = instance.current_step_index;

            if control.is_cancelled() {
                info!("Workflow {} cancelled before step {}", instance.id, index);
                instance.finish(WorkflowStatus::Cancelled);
                self.checkpoint(instance, index).await;
                self.announce(instance).await;
                return instance.status;
            }

            if control.is_paused() {
                info!("Workflow {} paused before step {}", instance.id, index);
                self.set_status(instance, WorkflowStatus::Paused).await;
                self.checkpoint(instance, index).await;
                return instance.status;
            }

            // Restored from a checkpoint that already recorded this step.
            if instance.steps[index].status.is_terminal() {
                instance.advance();
                continue;
            }

            let critical_failure = self.visit_step(instance, index).await;

            if let Some(err) = critical_failure {
                error!("Workflow {} aborted: {}", instance.id, err);
                instance.error_message = Some(err.to_string());
                instance.finish(WorkflowStatus::Failed);
                // Cursor stays on the failed step.
                self.checkpoint(instance, index).await;
                self.announce(instance).await;
                return instance.status;
            }

            self.checkpoint(instance, index + 1).await;
            instance.advance();
        }

        instance.finish(WorkflowStatus::Completed);
        let end = instance.steps.len();
        self.checkpoint(instance, end).await;
        self.announce(instance).await;

        info!(
            "Workflow {} completed: {} completed, {} failed, {} skipped in {:.2}s",
            instance.id,
            instance.metrics.completed_steps,
            instance.metrics.failed_steps,
            instance.metrics.skipped_steps,
            instance.metrics.total_execution_time
        );

        instance.status
    }

    /// Gates and executes the step at `index`, recording its terminal status.
    /// Returns the error to abort with if a critical step failed.
    async fn visit_step(
        &self,
        instance: &mut WorkflowInstance,
        index: usize,
    ) -> Option<OrchestrationError> {
        let gate = check_dependencies(&instance.steps[index], &instance.steps);

        if let Err(reason) = gate {
            info!("[{}] {}", instance.id, reason);
            let step = &mut instance.steps[index];
            step.status = StepStatus::Skipped;
            step.error = Some(reason.to_string());
            instance.metrics.skipped_steps += 1;

            let event = WorkflowEvent::step_finished(&instance.id, &step.id, StepStatus::Skipped);
            notify(&self.sink, event).await;
            return None;
        }

        let step_id = instance.steps[index].id.clone();
        notify(&self.sink, WorkflowEvent::step_started(&instance.id, &step_id)).await;

        let outcome = self.executor.execute(instance, index).await;
        instance.status = WorkflowStatus::InProgress;

        let step = &mut instance.steps[index];
        step.end_time = Some(Utc::now());

        let critical_failure = match outcome {
            Ok(value) => {
                info!("[{}] Step '{}' completed successfully", instance.id, step.id);
                step.status = StepStatus::Completed;
                step.result = Some(value.clone());
                instance.context.insert(step_result_key(&step.id), value);
                instance.metrics.completed_steps += 1;
                None
            }
            Err(err) => {
                error!("[{}] Step '{}' failed: {}", instance.id, step.id, err);
                step.status = StepStatus::Failed;
                step.error = Some(err.to_string());
                instance.metrics.failed_steps += 1;

                step.critical.then(|| OrchestrationError::CriticalStepFailure {
                    step_id: step.id.clone(),
                    reason: err.to_string(),
                })
            }
        };

        let status = instance.steps[index].status;
        notify(&self.sink, WorkflowEvent::step_finished(&instance.id, &step_id, status)).await;

        critical_failure
    }

    /// Snapshots the instance with the given resume cursor and persists it.
    async fn checkpoint(&self, instance: &mut WorkflowInstance, resume_index: usize) {
        instance.create_checkpoint(resume_index);
        persist(self.store.as_ref(), instance).await;
    }

    async fn set_status(&self, instance: &mut WorkflowInstance, status: WorkflowStatus) {
        instance.status = status;
        self.announce(instance).await;
    }

    async fn announce(&self, instance: &WorkflowInstance) {
        let event = WorkflowEvent::workflow_status(&instance.id, instance.status);
        notify(&self.sink, event).await;
    }
}

/// Writes the instance (with its checkpoint) through the store.
///
/// Save failures are logged and never abort the workflow.
pub async fn persist(store: &dyn CheckpointStore, instance: &WorkflowInstance) -> bool {
    let blob = match instance.to_blob() {
        Ok(blob) => blob,
        Err(e) => {
            warn!("Could not serialize checkpoint for {}: {}", instance.id, e);
            return false;
        }
    };

    match store.save(&instance.id, &blob).await {
        Ok(true) => true,
        Ok(false) => {
            warn!("Checkpoint store declined checkpoint for {}", instance.id);
            false
        }
        Err(e) => {
            warn!("Failed to save checkpoint for {}: {}", instance.id, e);
            false
        }
    }
}
