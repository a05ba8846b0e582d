//! Capability Command Table
//!
//! Maps `(capability, operation)` to a typed async handler. Templates are
//! checked against this table when they are registered, so an unknown
//! operation fails at startup instead of halfway through a run.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use crate::error::CapabilityError;
use crate::workflow::Context;

/// A single operation exposed by a capability.
///
/// Implemented for any `Fn(Context) -> impl Future<Output = Result<Value, _>>`,
/// so closures can be registered directly.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn call(&self, input: Context) -> Result<Value, CapabilityError>;
}

#[async_trait]
impl<F, Fut> OperationHandler for F
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
{
    async fn call(&self, input: Context) -> Result<Value, CapabilityError> {
        (self)(input).await
    }
}

/// A provider exposing several operations behind one object.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Logical capability name used by templates.
    fn name(&self) -> &str;

    /// Operations this capability answers to.
    fn operations(&self) -> Vec<String>;

    async fn invoke(&self, operation: &str, input: Context) -> Result<Value, CapabilityError>;
}

/// Adapts one operation of a [`Capability`] into an [`OperationHandler`].
struct CapabilityOperation {
    capability: Arc<dyn Capability>,
    operation: String,
}

#[async_trait]
impl OperationHandler for CapabilityOperation {
    async fn call(&self, input: Context) -> Result<Value, CapabilityError> {
        self.capability.invoke(&self.operation, input).await
    }
}

/// Registry of operation handlers keyed by capability, then operation.
#[derive(Default, Clone)]
pub struct CommandTable {
    handlers: BTreeMap<String, BTreeMap<String, Arc<dyn OperationHandler>>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous binding.
    pub fn register<H>(
        &mut self,
        capability: impl Into<String>,
        operation: impl Into<String>,
        handler: H,
    ) -> &mut Self
    where
        H: OperationHandler + 'static,
    {
        let capability = capability.into();
        let operation = operation.into();
        debug!("Binding {}.{}", capability, operation);
        self.handlers
            .entry(capability)
            .or_default()
            .insert(operation, Arc::new(handler));
        self
    }

    /// Builder-style variant of [`CommandTable::register`].
    pub fn with<H>(
        mut self,
        capability: impl Into<String>,
        operation: impl Into<String>,
        handler: H,
    ) -> Self
    where
        H: OperationHandler + 'static,
    {
        self.register(capability, operation, handler);
        self
    }

    /// Binds every operation of a capability provider.
    pub fn bind(&mut self, capability: Arc<dyn Capability>) -> &mut Self {
        let name = capability.name().to_string();
        for operation in capability.operations() {
            self.register(
                name.clone(),
                operation.clone(),
                CapabilityOperation {
                    capability: Arc::clone(&capability),
                    operation,
                },
            );
        }
        self
    }

    pub fn contains(&self, capability: &str, operation: &str) -> bool {
        self.get(capability, operation).is_some()
    }

    pub fn get(&self, capability: &str, operation: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handlers
            .get(capability)
            .and_then(|ops| ops.get(operation))
            .cloned()
    }

    /// Bound capability names, sorted.
    pub fn capabilities(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Operations bound for a capability, sorted.
    pub fn operations(&self, capability: &str) -> Vec<String> {
        self.handlers
            .get(capability)
            .map(|ops| ops.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Invokes `capability.operation` with `input`.
    pub async fn invoke(
        &self,
        capability: &str,
        operation: &str,
        input: Context,
    ) -> Result<Value, CapabilityError> {
        let handler = self
            .get(capability, operation)
            .ok_or_else(|| CapabilityError::Unavailable {
                capability: capability.to_string(),
                operation: operation.to_string(),
            })?;
        handler.call(input).await
    }
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bindings: BTreeMap<&String, Vec<&String>> = self
            .handlers
            .iter()
            .map(|(cap, ops)| (cap, ops.keys().collect()))
            .collect();
        f.debug_struct("CommandTable").field("bindings", &bindings).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct PricingDesk;

    #[async_trait]
    impl Capability for PricingDesk {
        fn name(&self) -> &str {
            "market"
        }

        fn operations(&self) -> Vec<String> {
            vec!["optimize_price".to_string(), "compare_prices".to_string()]
        }

        async fn invoke(&self, operation: &str, input: Context) -> Result<Value, CapabilityError> {
            let cost = input.get::<f64>("cost").unwrap_or(0.0);
            match operation {
                "optimize_price" => Ok(json!({ "price": cost * 2.0 })),
                _ => Ok(json!({ "competitors": [] })),
            }
        }
    }

    #[tokio::test]
    async fn test_register_closure_and_invoke() {
        let table = CommandTable::new().with("content", "generate_listing", |input: Context| async move {
            let title = input.get::<String>("title").unwrap_or_default();
            Ok::<_, CapabilityError>(json!({ "headline": title.to_uppercase() }))
        });

        let out = table
            .invoke(
                "content",
                "generate_listing",
                Context::from_pairs([("title", json!("desk lamp"))]),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({ "headline": "DESK LAMP" }));
    }

    #[tokio::test]
    async fn test_missing_operation_is_unavailable() {
        let table = CommandTable::new();
        let err = table
            .invoke("market", "analyze", Context::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CapabilityError::Unavailable {
                capability: "market".to_string(),
                operation: "analyze".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_bind_capability_provider() {
        let mut table = CommandTable::new();
        table.bind(Arc::new(PricingDesk));

        assert!(table.contains("market", "optimize_price"));
        assert!(!table.contains("market", "ship"));
        assert_eq!(table.operations("market"), vec!["compare_prices", "optimize_price"]);

        let out = table
            .invoke("market", "optimize_price", Context::from_pairs([("cost", json!(10.0))]))
            .await
            .unwrap();
        assert_eq!(out["price"], json!(20.0));
    }

    #[test]
    fn test_capabilities_sorted() {
        let table = CommandTable::new()
            .with("logistics", "quote", |_: Context| async { Ok::<_, CapabilityError>(json!(null)) })
            .with("content", "write", |_: Context| async { Ok::<_, CapabilityError>(json!(null)) });
        assert_eq!(table.capabilities(), vec!["content", "logistics"]);
        assert!(format!("{:?}", table).contains("logistics"));
    }
}
