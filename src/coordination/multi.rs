//! Multi-Capability Coordination
//!
//! Runs one named piece of work across several capabilities in turn,
//! passing each one the outputs gathered so far. A failure partway through
//! stops the sequence but keeps every output already obtained.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;

use crate::capability::CommandTable;
use crate::workflow::retry::DEFAULT_TIMEOUT_SECS;
use crate::workflow::Context;

/// Operation used when a capability has none named after the workflow type.
pub const COORDINATE_OPERATION: &str = "coordinate";

/// Overall outcome of a coordination run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationStatus {
    Completed,
    PartialSuccess,
    Failed,
}

impl fmt::Display for CoordinationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::PartialSuccess => "partial_success",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Structured result returned to callers; failures never surface as errors.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CoordinationResult {
    pub workflow_type: String,
    pub status: CoordinationStatus,

    /// Output of every capability that succeeded, in call order
    pub outputs: IndexMap<String, Value>,

    pub successful_capabilities: Vec<String>,

    /// The capability that failed followed by any that never ran
    pub failed_capabilities: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Key under which a capability's output is visible to later capabilities.
pub fn output_key(capability: &str) -> String {
    format!("{}_output", capability)
}

/// Drives [`coordinate`](Coordinator::coordinate) calls against the command table.
#[derive(Clone, Debug)]
pub struct Coordinator {
    commands: Arc<CommandTable>,
    call_timeout: Duration,
}

impl Coordinator {
    pub fn new(commands: Arc<CommandTable>) -> Self {
        Self {
            commands,
            call_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Picks the operation a capability runs for `workflow_type`.
    fn operation_for(&self, capability: &str, workflow_type: &str) -> String {
        if self.commands.contains(capability, workflow_type) {
            workflow_type.to_string()
        } else {
            COORDINATE_OPERATION.to_string()
        }
    }

    /// Runs `workflow_type` across `capabilities` in order.
    ///
    /// Each capability receives `context` plus `<capability>_output` for
    /// every capability that already succeeded. A capability listed more
    /// than once is called once, at its first position.
    pub async fn coordinate(
        &self,
        workflow_type: &str,
        capabilities: &[String],
        context: &Context,
    ) -> CoordinationResult {
        info!(
            "Coordinating '{}' across {:?}",
            workflow_type, capabilities
        );

        let mut order: Vec<String> = Vec::with_capacity(capabilities.len());
        for capability in capabilities {
            if !order.contains(capability) {
                order.push(capability.clone());
            }
        }

        let mut input = context.clone();
        let mut outputs = IndexMap::new();
        let mut failure: Option<(usize, String)> = None;

        for (position, capability) in order.iter().enumerate() {
            let operation = self.operation_for(capability, workflow_type);
            let call = self.commands.invoke(capability, &operation, input.clone());

            let reason = match timeout(self.call_timeout, call).await {
                Ok(Ok(output)) => {
                    input.insert(output_key(capability), output.clone());
                    outputs.insert(capability.clone(), output);
                    continue;
                }
                Ok(Err(e)) => format!("{}.{} failed: {}", capability, operation, e),
                Err(_) => format!(
                    "{}.{} timed out after {:?}",
                    capability, operation, self.call_timeout
                ),
            };

            error!("Coordination '{}' stopped: {}", workflow_type, reason);
            failure = Some((position, reason));
            break;
        }

        let successful_capabilities: Vec<String> = outputs.keys().cloned().collect();
        let (status, failed_capabilities, error) = match failure {
            None => (CoordinationStatus::Completed, Vec::new(), None),
            Some((position, reason)) => {
                let failed: Vec<String> = order[position..].to_vec();
                let status = if outputs.is_empty() {
                    CoordinationStatus::Failed
                } else {
                    warn!(
                        "Coordination '{}' kept {} outputs before failing",
                        workflow_type,
                        outputs.len()
                    );
                    CoordinationStatus::PartialSuccess
                };
                (status, failed, Some(reason))
            }
        };

        info!("Coordination '{}' finished: {}", workflow_type, status);

        CoordinationResult {
            workflow_type: workflow_type.to_string(),
            status,
            outputs,
            successful_capabilities,
            failed_capabilities,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn caps(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn launch_table() -> CommandTable {
        CommandTable::new()
            .with("market", "product_launch", |_: Context| async {
                Ok::<_, CapabilityError>(json!({ "demand": "high" }))
            })
            .with("content", COORDINATE_OPERATION, |input: Context| async move {
                let demand = input
                    .get_value("market_output")
                    .and_then(|v| v.get("demand"))
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok::<_, CapabilityError>(json!({ "headline": "New arrival", "demand_seen": demand }))
            })
            .with("executive", "product_launch", |_: Context| async {
                Err::<Value, _>(CapabilityError::failed("budget frozen"))
            })
    }

    #[tokio::test]
    async fn test_partial_success_keeps_outputs() {
        let coordinator = Coordinator::new(Arc::new(launch_table()));

        let result = coordinator
            .coordinate(
                "product_launch",
                &caps(&["market", "content", "executive"]),
                &Context::new(),
            )
            .await;

        assert_eq!(result.status, CoordinationStatus::PartialSuccess);
        assert_eq!(result.successful_capabilities, vec!["market", "content"]);
        assert_eq!(result.failed_capabilities, vec!["executive"]);
        assert_eq!(result.outputs["market"], json!({ "demand": "high" }));
        assert_eq!(result.outputs["content"]["demand_seen"], json!("high"));
        assert!(result.error.unwrap().contains("budget frozen"));
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let coordinator = Coordinator::new(Arc::new(launch_table()));
        let result = coordinator
            .coordinate("product_launch", &caps(&["market", "content"]), &Context::new())
            .await;

        assert_eq!(result.status, CoordinationStatus::Completed);
        assert!(result.failed_capabilities.is_empty());
        assert!(result.error.is_none());
        assert_eq!(result.outputs.len(), 2);
    }

    #[tokio::test]
    async fn test_first_failure_is_failed() {
        let coordinator = Coordinator::new(Arc::new(launch_table()));
        let result = coordinator
            .coordinate(
                "product_launch",
                &caps(&["executive", "market", "content"]),
                &Context::new(),
            )
            .await;

        assert_eq!(result.status, CoordinationStatus::Failed);
        assert!(result.outputs.is_empty());
        assert_eq!(result.failed_capabilities, vec!["executive", "market", "content"]);
    }

    #[tokio::test]
    async fn test_unbound_capability_counts_as_failure() {
        let coordinator = Coordinator::new(Arc::new(launch_table()));
        let result = coordinator
            .coordinate("product_launch", &caps(&["market", "logistics"]), &Context::new())
            .await;

        assert_eq!(result.status, CoordinationStatus::PartialSuccess);
        assert_eq!(result.failed_capabilities, vec!["logistics"]);
        assert!(result.error.unwrap().contains("logistics.coordinate"));
    }

    #[tokio::test]
    async fn test_repeated_capability_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let table = launch_table().with("logistics", COORDINATE_OPERATION, move |_: Context| {
            seen.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok::<_, CapabilityError>(json!({ "carrier": "dhl" })))
        });
        let coordinator = Coordinator::new(Arc::new(table));

        let result = coordinator
            .coordinate(
                "restock",
                &caps(&["logistics", "content", "logistics"]),
                &Context::new(),
            )
            .await;

        assert_eq!(result.status, CoordinationStatus::Completed);
        assert_eq!(result.successful_capabilities, vec!["logistics", "content"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let result = coordinator
            .coordinate(
                "product_launch",
                &caps(&["market", "executive", "market", "executive"]),
                &Context::new(),
            )
            .await;
        assert_eq!(result.failed_capabilities, vec!["executive"]);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(CoordinationStatus::PartialSuccess).unwrap(),
            json!("partial_success")
        );
        assert_eq!(CoordinationStatus::Failed.to_string(), "failed");
    }
}
