//! Workflow Execution Module
//!
//! Drives workflow instances step by step: dependency gating, retrying
//! step execution, checkpointing and cooperative cancel/pause.
//!
//! # Architecture
//!
//! - [`engine`]: Main execution loop over one instance
//! - [`gate`]: Dependency gate deciding whether a step may run
//! - [`step`]: Individual step execution with timeout and retry

pub mod engine;
pub mod gate;
pub mod step;

pub use engine::{persist, Engine, RunControl};
pub use gate::check_dependencies;
pub use step::StepExecutor;
