//! Handoff Coordinator
//!
//! Transfers an in-progress interaction from one capability to another.
//! Every handoff leaves a [`HandoffRecord`] behind, so the history can be
//! queried after the fact.
//!
//! # Merged context
//!
//! The receiving capability gets:
//!
//! ```json
//! {
//!   "previous_capability": "<from>",
//!   "reason": "...",
//!   "conversation_history": [...],
//!   "current_query": "...",
//!   "...": "caller context, overriding the keys above"
//! }
//! ```

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::timeout;
use uuid::Uuid;

use crate::capability::CommandTable;
use crate::error::OrchestrationError;
use crate::monitoring::{notify, NotificationSink, NullSink, WorkflowEvent};
use crate::workflow::Context;

/// Operation invoked on the receiving capability.
pub const HANDOFF_OPERATION: &str = "receive_handoff";

pub const DEFAULT_HANDOFF_TIMEOUT_SECS: u64 = 300;

/// Handoff lifecycle status.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    #[default]
    Initiated,
    InProgress,
    Completed,
    Failed,
}

impl HandoffStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One transfer between capabilities.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HandoffRecord {
    pub id: String,
    pub from_capability: String,
    pub to_capability: String,

    /// Merged context sent to the receiving capability
    pub context: Context,

    pub status: HandoffStatus,
    pub start_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Performs handoffs and keeps their history.
pub struct HandoffCoordinator {
    commands: Arc<CommandTable>,
    sink: Arc<dyn NotificationSink>,
    records: RwLock<IndexMap<String, HandoffRecord>>,
    handoff_timeout: Duration,
}

impl HandoffCoordinator {
    pub fn new(commands: Arc<CommandTable>) -> Self {
        Self {
            commands,
            sink: Arc::new(NullSink),
            records: RwLock::new(IndexMap::new()),
            handoff_timeout: Duration::from_secs(DEFAULT_HANDOFF_TIMEOUT_SECS),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_timeout(mut self, handoff_timeout: Duration) -> Self {
        self.handoff_timeout = handoff_timeout;
        self
    }

    /// Hands the interaction described by `context` from one capability to
    /// another and returns the completed record, response included.
    ///
    /// # Errors
    ///
    /// `HandoffFailure` when the target capability is missing, fails or
    /// times out. The record stays queryable with status `Failed`.
    pub async fn initiate(
        &self,
        from_capability: &str,
        to_capability: &str,
        context: &Context,
    ) -> Result<HandoffRecord, OrchestrationError> {
        let merged = handoff_context(from_capability, context);
        let record = HandoffRecord {
            id: Uuid::new_v4().to_string(),
            from_capability: from_capability.to_string(),
            to_capability: to_capability.to_string(),
            context: merged.clone(),
            status: HandoffStatus::Initiated,
            start_time: Utc::now(),
            completion_time: None,
            response: None,
            error_message: None,
        };
        let id = record.id.clone();

        info!(
            "Handoff {}: {} -> {}",
            id, from_capability, to_capability
        );
        self.store(record.clone());
        self.announce(&record).await;

        let record = self.update(&id, |r| r.status = HandoffStatus::InProgress);
        if let Some(record) = &record {
            self.announce(record).await;
        }

        let call = self
            .commands
            .invoke(to_capability, HANDOFF_OPERATION, merged);
        let outcome = match timeout(self.handoff_timeout, call).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "'{}' did not accept the handoff within {:?}",
                to_capability, self.handoff_timeout
            )),
        };

        match outcome {
            Ok(response) => {
                let record = self
                    .update(&id, |r| {
                        r.status = HandoffStatus::Completed;
                        r.completion_time = Some(Utc::now());
                        r.response = Some(response.clone());
                    })
                    .ok_or_else(|| missing_record(&id))?;
                info!("Handoff {} completed", id);
                self.announce(&record).await;
                Ok(record)
            }
            Err(reason) => {
                error!("Handoff {} failed: {}", id, reason);
                if let Some(record) = self.update(&id, |r| {
                    r.status = HandoffStatus::Failed;
                    r.completion_time = Some(Utc::now());
                    r.error_message = Some(reason.clone());
                }) {
                    self.announce(&record).await;
                }
                Err(OrchestrationError::HandoffFailure {
                    handoff_id: id,
                    reason,
                })
            }
        }
    }

    /// Looks up a handoff by id.
    pub fn handoff(&self, handoff_id: &str) -> Option<HandoffRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handoff_id)
            .cloned()
    }

    /// All handoffs in the order they were initiated.
    pub fn handoffs(&self) -> Vec<HandoffRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Removes a finished handoff from the history. Handoffs still in
    /// flight are kept. History otherwise grows until forgotten.
    pub fn forget(&self, handoff_id: &str) -> Option<HandoffRecord> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if !records.get(handoff_id)?.status.is_terminal() {
            return None;
        }
        records.shift_remove(handoff_id)
    }

    fn store(&self, record: HandoffRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record);
    }

    /// Applies `change` to a stored record and returns the updated copy.
    fn update(&self, id: &str, change: impl FnOnce(&mut HandoffRecord)) -> Option<HandoffRecord> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records.get_mut(id)?;
        change(record);
        Some(record.clone())
    }

    async fn announce(&self, record: &HandoffRecord) {
        let event = WorkflowEvent::handoff_status(
            &record.id,
            &record.from_capability,
            &record.to_capability,
            record.status,
        );
        notify(&self.sink, event).await;
    }
}

/// Builds the context handed to the receiving capability.
pub fn handoff_context(from_capability: &str, context: &Context) -> Context {
    let mut merged = Context::new();
    merged.insert("previous_capability", json!(from_capability));
    merged.insert(
        "reason",
        json!(context.get_str_or("reason", "capability handoff")),
    );
    merged.insert(
        "conversation_history",
        context
            .get_value("conversation_history")
            .cloned()
            .unwrap_or_else(|| json!([])),
    );
    merged.insert(
        "current_query",
        json!(context.get_str_or("current_query", "")),
    );
    merged.merge(context);
    merged
}

fn missing_record(id: &str) -> OrchestrationError {
    OrchestrationError::HandoffFailure {
        handoff_id: id.to_string(),
        reason: "handoff record disappeared".to_string(),
    }
}
