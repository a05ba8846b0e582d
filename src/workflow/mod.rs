//! Workflow Definition Module
//!
//! Provides data structures and utilities for defining, parsing, and
//! validating seller workflows, and the runtime records they turn into.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Step, Template)
//! - [`context`]: Typed key-value store shared across steps
//! - [`retry`]: Retry strategies and delay functions
//! - [`instance`]: Workflow instances and metrics
//! - [`state`]: Checkpoint snapshots
//! - [`parser`]: YAML parsing and loading
//! - [`validator`]: Validation rules and dependency checking
//! - [`templates`]: Built-in seller templates

pub mod context;
pub mod instance;
pub mod model;
pub mod parser;
pub mod retry;
pub mod state;
pub mod templates;
pub mod validator;

pub use context::{step_result_key, Context};
pub use instance::{WorkflowInstance, WorkflowMetrics, WorkflowStatus};
pub use model::{ResultKind, Step, StepStatus, Template};
pub use parser::{load_templates, parse_templates};
pub use retry::{RetryPolicy, RetryStrategy};
pub use state::{Checkpoint, StepSnapshot};
pub use validator::{validate_steps, validate_template, ValidationError};
