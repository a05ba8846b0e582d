//! Orchestration Registry
//!
//! The [`Orchestrator`] is the service object callers hold: it owns the
//! template registry and the capability command table, creates and drives
//! workflow instances, and exposes the consensus, handoff and coordination
//! entry points. Build one at startup and share it (typically in an `Arc`);
//! independent orchestrators in one process do not share any state.
//!
//! # Example
//!
//! ```rust,no_run
//! use sellerflow::capability::{bind_loopback, CommandTable};
//! use sellerflow::workflow::{templates, Context};
//! use sellerflow::Orchestrator;
//!
//! # async fn demo() -> sellerflow::Result<()> {
//! let builtin = templates::builtin().map_err(sellerflow::OrchestrationError::InvalidTemplate)?;
//! let mut commands = CommandTable::new();
//! bind_loopback(&mut commands, &builtin);
//!
//! let orchestrator = Orchestrator::builder(commands).build();
//! orchestrator.register_templates(builtin)?;
//!
//! let instance = orchestrator
//!     .start_workflow("product_launch", Context::new(), Context::new())
//!     .await?;
//! println!("{} finished as {}", instance.id, instance.status);
//! # Ok(())
//! # }
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use log::{info, warn};

use crate::capability::CommandTable;
use crate::config::EngineConfig;
use crate::coordination::{
    ConsensusEngine, ConsensusOutcome, CoordinationResult, Coordinator, HandoffCoordinator,
    HandoffRecord,
};
use crate::error::{OrchestrationError, Result};
use crate::execution::{persist, Engine, RunControl};
use crate::monitoring::{notify, LogSink, NotificationSink, WorkflowEvent};
use crate::storage::{CheckpointStore, InMemoryCheckpointStore};
use crate::workflow::{
    load_templates, templates, validate_steps, validate_template, Context, Step, Template,
    WorkflowInstance, WorkflowStatus,
};

/// Assembles an [`Orchestrator`].
pub struct OrchestratorBuilder {
    commands: CommandTable,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn NotificationSink>,
    config: EngineConfig,
}

impl OrchestratorBuilder {
    /// Checkpoint backend; in-memory by default.
    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    /// Progress sink; log output by default.
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Orchestrator {
        let commands = Arc::new(self.commands);
        Orchestrator {
            templates: RwLock::new(IndexMap::new()),
            engine: Engine::new(Arc::clone(&commands), Arc::clone(&self.store), Arc::clone(&self.sink)),
            consensus: ConsensusEngine::new(Arc::clone(&commands))
                .with_threshold(self.config.consensus_threshold),
            handoffs: HandoffCoordinator::new(Arc::clone(&commands)).with_sink(Arc::clone(&self.sink)),
            coordinator: Coordinator::new(Arc::clone(&commands)),
            commands,
            store: self.store,
            sink: self.sink,
            config: self.config,
            instances: RwLock::new(HashMap::new()),
            running: RwLock::new(HashMap::new()),
        }
    }
}

/// Template registry, capability bindings and workflow entry points.
pub struct Orchestrator {
    templates: RwLock<IndexMap<String, Template>>,
    commands: Arc<CommandTable>,
    engine: Engine,
    consensus: ConsensusEngine,
    handoffs: HandoffCoordinator,
    coordinator: Coordinator,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn NotificationSink>,
    config: EngineConfig,

    /// Last known state of every instance created here
    instances: RwLock<HashMap<String, WorkflowInstance>>,

    /// Cancel/pause handles of instances currently being driven
    running: RwLock<HashMap<String, RunControl>>,
}

impl Orchestrator {
    /// Starts building an orchestrator over a fixed set of bindings.
    pub fn builder(commands: CommandTable) -> OrchestratorBuilder {
        OrchestratorBuilder {
            commands,
            store: Arc::new(InMemoryCheckpointStore::new()),
            sink: Arc::new(LogSink),
            config: EngineConfig::default(),
        }
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    /// Registers a template after validating it against the bindings.
    ///
    /// # Errors
    ///
    /// * `DuplicateTemplate` - the id is already registered
    /// * `InvalidTemplate` - validation failed (messages joined by newlines)
    pub fn register_template(&self, template: Template) -> Result<()> {
        let mut registry = self.templates.write().unwrap_or_else(PoisonError::into_inner);

        if registry.contains_key(&template.id) {
            return Err(OrchestrationError::DuplicateTemplate(template.id));
        }
        validate_template(&template, &self.commands).map_err(OrchestrationError::InvalidTemplate)?;

        info!(
            "Registered template '{}' v{} ({} steps)",
            template.id,
            template.version,
            template.len()
        );
        registry.insert(template.id.clone(), template);
        Ok(())
    }

    /// Registers several templates, stopping at the first failure.
    pub fn register_templates(&self, templates: impl IntoIterator<Item = Template>) -> Result<usize> {
        let mut count = 0;
        for template in templates {
            self.register_template(template)?;
            count += 1;
        }
        Ok(count)
    }

    /// Registers the seller templates shipped with the crate.
    pub fn register_builtin_templates(&self) -> Result<usize> {
        let builtin = templates::builtin().map_err(OrchestrationError::InvalidTemplate)?;
        self.register_templates(builtin)
    }

    /// Registers every template in a YAML file.
    pub fn load_template_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let loaded =
            load_templates(path).map_err(|e| OrchestrationError::InvalidTemplate(e.to_string()))?;
        self.register_templates(loaded)
    }

    pub fn template(&self, template_id: &str) -> Option<Template> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(template_id)
            .cloned()
    }

    /// Registered templates in registration order.
    pub fn list_templates(&self) -> Vec<Template> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Workflow lifecycle
    // ------------------------------------------------------------------

    /// Creates a Pending instance of a registered template.
    ///
    /// The instance context is `default_parameters`, overridden by
    /// `parameters`, overridden by `context`.
    pub fn instantiate(
        &self,
        template_id: &str,
        context: Context,
        parameters: Context,
    ) -> Result<WorkflowInstance> {
        let template = self
            .template(template_id)
            .ok_or_else(|| OrchestrationError::TemplateNotFound(template_id.to_string()))?;

        let seeded = template.default_parameters.merged(&parameters).merged(&context);
        let instance = WorkflowInstance::new(Some(template.id.clone()), &template.steps, seeded);

        info!(
            "Created workflow {} from template '{}' ({} steps)",
            instance.id,
            template.id,
            instance.steps.len()
        );
        self.remember(&instance);
        Ok(instance)
    }

    /// Creates a Pending instance from an ad-hoc step list.
    pub fn create_workflow(&self, steps: Vec<Step>, context: Context) -> Result<WorkflowInstance> {
        validate_steps(&steps, &self.commands).map_err(OrchestrationError::InvalidTemplate)?;

        let instance = WorkflowInstance::new(None, &steps, context);
        info!("Created ad-hoc workflow {} ({} steps)", instance.id, steps.len());
        self.remember(&instance);
        Ok(instance)
    }

    /// Drives an instance until it finishes, fails critically, or is
    /// cancelled or paused, and returns it.
    ///
    /// # Errors
    ///
    /// * `WorkflowRunning` - another task is already driving this instance
    /// * `WorkflowFinished` - the instance, or what this orchestrator last
    ///   recorded for it, is completed, failed or cancelled
    pub async fn execute(&self, instance: WorkflowInstance) -> Result<WorkflowInstance> {
        let slot = self
            .claim(&instance.id)
            .map_err(|_| OrchestrationError::WorkflowRunning(instance.id.clone()))?;

        let recorded = match self.latest(&instance.id).await {
            Ok(known) => known.status,
            Err(_) => instance.status,
        };
        for status in [instance.status, recorded] {
            if status.is_terminal() {
                return Err(OrchestrationError::WorkflowFinished {
                    instance_id: instance.id.clone(),
                    status: status.to_string(),
                });
            }
        }

        Ok(self.drive(instance, slot).await)
    }

    /// Instantiates a template and executes it.
    pub async fn start_workflow(
        &self,
        template_id: &str,
        context: Context,
        parameters: Context,
    ) -> Result<WorkflowInstance> {
        let instance = self.instantiate(template_id, context, parameters)?;
        self.execute(instance).await
    }

    /// Reloads an instance from its last persisted checkpoint and continues
    /// it at the stored cursor.
    ///
    /// Completed steps are never run again. A step that was in flight when
    /// the process stopped runs again.
    ///
    /// # Errors
    ///
    /// `ResumeFailed` when nothing usable is stored, the instance is running,
    /// or it already completed, failed or was cancelled.
    pub async fn resume(&self, instance_id: &str) -> Result<WorkflowInstance> {
        let slot = self
            .claim(instance_id)
            .map_err(|_| resume_failed(instance_id, "workflow is already running"))?;

        let mut instance = self
            .load_persisted(instance_id)
            .await
            .map_err(|reason| resume_failed(instance_id, reason))?
            .ok_or_else(|| resume_failed(instance_id, "no checkpoint found"))?;

        instance
            .restore_from_checkpoint()
            .map_err(|reason| resume_failed(instance_id, reason))?;

        if instance.status.is_terminal() {
            return Err(resume_failed(
                instance_id,
                format!("workflow is already {}", instance.status),
            ));
        }

        info!(
            "Resuming workflow {} at step {}/{}",
            instance.id,
            instance.current_step_index,
            instance.steps.len()
        );
        Ok(self.drive(instance, slot).await)
    }

    /// Cancels an instance. A running instance stops before its next step;
    /// a pending or paused one is cancelled immediately.
    ///
    /// Returns `false` if the instance had already finished.
    pub async fn cancel(&self, instance_id: &str) -> Result<bool> {
        let _slot = match self.claim(instance_id) {
            Ok(slot) => slot,
            Err(control) => {
                info!("Cancellation requested for workflow {}", instance_id);
                control.cancel();
                return Ok(true);
            }
        };

        let mut instance = self.latest(instance_id).await?;
        if instance.status.is_terminal() {
            return Ok(false);
        }

        instance.finish(WorkflowStatus::Cancelled);
        let cursor = instance.current_step_index;
        instance.create_checkpoint(cursor);
        persist(self.store.as_ref(), &instance).await;
        notify(&self.sink, WorkflowEvent::workflow_status(instance_id, instance.status)).await;

        info!("Workflow {} cancelled", instance_id);
        self.remember(&instance);
        Ok(true)
    }

    /// Asks a running instance to pause before its next step. Returns
    /// `false` if the instance is not currently running.
    pub async fn pause(&self, instance_id: &str) -> Result<bool> {
        if let Some(control) = self.control(instance_id) {
            info!("Pause requested for workflow {}", instance_id);
            control.pause();
            return Ok(true);
        }

        self.workflow(instance_id).await?;
        Ok(false)
    }

    /// Latest known state of an instance.
    ///
    /// A running instance is read from its last persisted checkpoint; any
    /// other from memory, falling back to the checkpoint store.
    pub async fn workflow(&self, instance_id: &str) -> Result<WorkflowInstance> {
        if self.is_running(instance_id) {
            if let Ok(Some(instance)) = self.load_persisted(instance_id).await {
                return Ok(instance);
            }
        }
        self.latest(instance_id).await
    }

    /// Drops an instance that is not running from memory and deletes its
    /// checkpoint. Instance history is otherwise kept for the lifetime of
    /// the orchestrator. Returns whether anything was known about it.
    pub async fn forget(&self, instance_id: &str) -> Result<bool> {
        let _slot = self
            .claim(instance_id)
            .map_err(|_| OrchestrationError::WorkflowRunning(instance_id.to_string()))?;

        let remembered = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(instance_id)
            .is_some();

        let stored = match self.store.delete(instance_id).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!("Could not delete checkpoint for {}: {}", instance_id, e);
                false
            }
        };

        if remembered || stored {
            info!("Forgot workflow {}", instance_id);
        }
        Ok(remembered || stored)
    }

    /// Ids of instances currently being driven.
    pub fn running_workflows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------
    // Cross-capability entry points
    // ------------------------------------------------------------------

    /// Consensus round at the configured threshold.
    pub async fn decide(&self, context: &Context, capabilities: &[String]) -> ConsensusOutcome {
        self.consensus.decide(context, capabilities).await
    }

    pub async fn decide_with_threshold(
        &self,
        context: &Context,
        capabilities: &[String],
        threshold: f64,
    ) -> ConsensusOutcome {
        self.consensus
            .decide_with_threshold(context, capabilities, threshold)
            .await
    }

    /// Hands an interaction from one capability to another.
    pub async fn handoff(
        &self,
        from_capability: &str,
        to_capability: &str,
        context: &Context,
    ) -> Result<HandoffRecord> {
        self.handoffs
            .initiate(from_capability, to_capability, context)
            .await
    }

    pub fn handoff_record(&self, handoff_id: &str) -> Option<HandoffRecord> {
        self.handoffs.handoff(handoff_id)
    }

    pub fn handoffs(&self) -> Vec<HandoffRecord> {
        self.handoffs.handoffs()
    }

    /// Drops a handoff record from the history.
    pub fn forget_handoff(&self, handoff_id: &str) -> Option<HandoffRecord> {
        self.handoffs.forget(handoff_id)
    }

    /// Runs `workflow_type` across `capabilities`, keeping partial output.
    pub async fn coordinate(
        &self,
        workflow_type: &str,
        capabilities: &[String],
        context: &Context,
    ) -> CoordinationResult {
        self.coordinator
            .coordinate(workflow_type, capabilities, context)
            .await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn remember(&self, instance: &WorkflowInstance) {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instance.id.clone(), instance.clone());
    }

    fn remembered(&self, instance_id: &str) -> Option<WorkflowInstance> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance_id)
            .cloned()
    }

    /// Takes the exclusive right to drive or finish `instance_id`. When
    /// another task holds it, returns that task's run control instead.
    fn claim(&self, instance_id: &str) -> std::result::Result<RunSlot<'_>, RunControl> {
        let mut running = self.running.write().unwrap_or_else(PoisonError::into_inner);
        match running.entry(instance_id.to_string()) {
            Entry::Occupied(held) => Err(held.get().clone()),
            Entry::Vacant(free) => {
                let control = RunControl::new();
                free.insert(control.clone());
                Ok(RunSlot {
                    running: &self.running,
                    instance_id: instance_id.to_string(),
                    control,
                })
            }
        }
    }

    async fn drive(&self, mut instance: WorkflowInstance, slot: RunSlot<'_>) -> WorkflowInstance {
        self.engine.run(&mut instance, &slot.control).await;
        // Recorded before the slot is released so the next claimant sees it.
        self.remember(&instance);
        drop(slot);
        instance
    }

    fn control(&self, instance_id: &str) -> Option<RunControl> {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance_id)
            .cloned()
    }

    fn is_running(&self, instance_id: &str) -> bool {
        self.control(instance_id).is_some()
    }

    /// Remembered state, falling back to the checkpoint store.
    async fn latest(&self, instance_id: &str) -> Result<WorkflowInstance> {
        if let Some(instance) = self.remembered(instance_id) {
            return Ok(instance);
        }
        match self.load_persisted(instance_id).await {
            Ok(Some(instance)) => Ok(instance),
            Ok(None) => Err(OrchestrationError::WorkflowNotFound(instance_id.to_string())),
            Err(reason) => {
                warn!("Could not read checkpoint for {}: {}", instance_id, reason);
                Err(OrchestrationError::WorkflowNotFound(instance_id.to_string()))
            }
        }
    }

    async fn load_persisted(
        &self,
        instance_id: &str,
    ) -> std::result::Result<Option<WorkflowInstance>, String> {
        let Some(blob) = self.store.load(instance_id).await.map_err(|e| e.to_string())? else {
            return Ok(None);
        };
        WorkflowInstance::from_blob(&blob)
            .map(Some)
            .map_err(|e| format!("corrupt checkpoint: {}", e))
    }
}

/// Exclusive claim on an instance id in the running map, released on drop.
struct RunSlot<'a> {
    running: &'a RwLock<HashMap<String, RunControl>>,
    instance_id: String,
    control: RunControl,
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        self.running
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.instance_id);
    }
}

fn resume_failed(instance_id: &str, reason: impl Into<String>) -> OrchestrationError {
    OrchestrationError::ResumeFailed {
        instance_id: instance_id.to_string(),
        reason: reason.into(),
    }
}
