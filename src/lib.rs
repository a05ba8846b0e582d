//! Sellerflow - Seller Workflow Execution Engine
//!
//! Automates e-commerce seller workflows by coordinating capability
//! providers (market analysis, content generation, logistics, executive
//! decisions) through template-driven, checkpointed workflows.
//!
//! # Architecture
//!
//! The library is organized into these modules:
//!
//! - [`workflow`]: Templates, steps, retry policies, instances and checkpoints
//! - [`execution`]: Engine loop, dependency gate and step executor
//! - [`capability`]: `(capability, operation)` command table
//! - [`storage`]: Checkpoint stores
//! - [`monitoring`]: Progress notifications and execution timeline
//! - [`coordination`]: Consensus, handoff and multi-capability coordination
//! - [`registry`]: The [`Orchestrator`] service object
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use sellerflow::capability::CommandTable;
//! use sellerflow::error::CapabilityError;
//! use sellerflow::workflow::{Context, Step, Template};
//! use sellerflow::Orchestrator;
//!
//! # async fn demo() -> sellerflow::Result<()> {
//! let commands = CommandTable::new().with("market", "analyze_market", |_: Context| async {
//!     Ok::<_, CapabilityError>(json!({ "demand": "high" }))
//! });
//!
//! let orchestrator = Orchestrator::builder(commands).build();
//! orchestrator.register_template(
//!     Template::new("research", "Market Research")
//!         .with_step(Step::new("analyze", "market", "analyze_market")),
//! )?;
//!
//! let instance = orchestrator
//!     .start_workflow("research", Context::new(), Context::new())
//!     .await?;
//! println!("{}: {}", instance.id, instance.status);
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod config;
pub mod coordination;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod registry;
pub mod storage;
pub mod workflow;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{OrchestrationError, Result};
pub use execution::Engine;
pub use registry::Orchestrator;
pub use workflow::{Context, Step, Template, WorkflowInstance, WorkflowStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Sellerflow";
