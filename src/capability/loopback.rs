//! Loopback capability that echoes its input.
//!
//! Used by the CLI to run templates end to end without real providers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::table::{Capability, CommandTable};
use crate::coordination::consensus::DECIDE_OPERATION;
use crate::coordination::handoff::HANDOFF_OPERATION;
use crate::coordination::multi::COORDINATE_OPERATION;
use crate::error::CapabilityError;
use crate::workflow::{Context, Template};

/// Answers every configured operation with `{capability, operation, input}`.
///
/// The `decide` operation answers with an approving decision at the
/// configured confidence so consensus can be exercised too.
pub struct LoopbackCapability {
    name: String,
    operations: Vec<String>,
    confidence: f64,
}

impl LoopbackCapability {
    pub fn new(name: impl Into<String>, operations: Vec<String>) -> Self {
        Self {
            name: name.into(),
            operations,
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

#[async_trait]
impl Capability for LoopbackCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn operations(&self) -> Vec<String> {
        self.operations.clone()
    }

    async fn invoke(&self, operation: &str, input: Context) -> Result<Value, CapabilityError> {
        if operation == DECIDE_OPERATION {
            return Ok(json!({
                "choice": "approve",
                "confidence": self.confidence,
                "rationale": format!("{} loopback", self.name),
            }));
        }
        Ok(json!({
            "capability": self.name,
            "operation": operation,
            "input": input.to_json(),
        }))
    }
}

/// Binds a loopback capability for every capability the templates use.
///
/// Each one answers its template operations plus the decide, handoff and
/// coordinate operations.
pub fn bind_loopback(commands: &mut CommandTable, templates: &[Template]) {
    let mut operations: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for step in templates.iter().flat_map(|t| t.steps.iter()) {
        let ops = operations.entry(step.capability.clone()).or_default();
        if !ops.contains(&step.operation) {
            ops.push(step.operation.clone());
        }
    }

    for (name, mut ops) in operations {
        for extra in [DECIDE_OPERATION, HANDOFF_OPERATION, COORDINATE_OPERATION] {
            if !ops.iter().any(|op| op == extra) {
                ops.push(extra.to_string());
            }
        }
        commands.bind(Arc::new(LoopbackCapability::new(name, ops)));
    }
}
