//! Workflow Data Model
//!
//! Core data structures representing steps and the templates they belong to.
//!
//! # Example YAML Format
//!
//! ```yaml
//! templates:
//!   - id: product_launch
//!     name: Product Launch
//!     default_parameters:
//!       marketplace: amazon
//!     steps:
//!       - id: market_research
//!         capability: market
//!         operation: analyze_market
//!         retry_strategy: exponential_backoff
//!         max_retries: 2
//!         timeout_seconds: 60
//!
//!       - id: listing_copy
//!         capability: content
//!         operation: generate_listing
//!         dependencies:
//!           - market_research
//!         critical: true
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use super::context::Context;
use super::retry::RetryPolicy;

/// Status of a step during execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started yet
    #[default]
    Pending,
    /// Capability call in flight
    InProgress,
    /// Finished successfully
    Completed,
    /// All attempts exhausted
    Failed,
    /// A dependency was not completed; never executed
    Skipped,
    /// Waiting out the delay before the next attempt
    Retrying,
}

impl StepStatus {
    /// Returns true for statuses a step never leaves during a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Declared type of the value a step publishes under `step_<id>_result`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    #[default]
    Any,
    Object,
    Array,
    String,
    Number,
    Bool,
}

impl ResultKind {
    /// Checks a result value against the declared kind.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
        }
    }
}

/// A single unit of work bound to a capability and operation.
///
/// Templates hold steps as blueprints (runtime fields at their defaults);
/// instantiation clones them into fresh runtime records.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Step {
    /// Unique identifier within the template
    pub id: String,

    /// Human-readable name (defaults to the id)
    #[serde(default)]
    pub name: String,

    /// Logical provider name (e.g. "market", "content")
    pub capability: String,

    /// Named action the capability exposes
    pub operation: String,

    /// Step-level inputs, overlaid by the instance context at execution time
    #[serde(default)]
    pub parameters: Context,

    /// IDs of earlier steps that must be completed before this one runs
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(flatten)]
    pub retry_policy: RetryPolicy,

    /// A failed critical step fails the whole workflow
    #[serde(default)]
    pub critical: bool,

    /// Expected type of this step's result
    #[serde(default)]
    pub result_kind: ResultKind,

    #[serde(default)]
    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Step {
    /// Creates a new step bound to `capability.operation`.
    ///
    /// # Example
    ///
    /// ```
    /// use sellerflow::workflow::{RetryPolicy, RetryStrategy, Step};
    ///
    /// let step = Step::new("copy", "content", "generate_listing")
    ///     .depends_on("research")
    ///     .with_retry(RetryPolicy::new(RetryStrategy::FixedDelay, 2, 30))
    ///     .critical();
    /// assert_eq!(step.dependencies, vec!["research"]);
    /// ```
    pub fn new(
        id: impl Into<String>,
        capability: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        let id = id.into().trim().to_string();
        Self {
            name: id.clone(),
            id,
            capability: capability.into().trim().to_string(),
            operation: operation.into().trim().to_string(),
            parameters: Context::new(),
            dependencies: Vec::new(),
            retry_policy: RetryPolicy::default(),
            critical: false,
            result_kind: ResultKind::Any,
            status: StepStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key, value);
        self
    }

    pub fn with_parameters(mut self, parameters: Context) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_result_kind(mut self, kind: ResultKind) -> Self {
        self.result_kind = kind;
        self
    }

    /// Marks the step as critical.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Adds a dependency on an earlier step.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    /// Returns a copy with all runtime fields cleared.
    pub fn to_runtime(&self) -> Self {
        let mut step = self.clone();
        step.reset();
        if step.name.is_empty() {
            step.name = step.id.clone();
        }
        step
    }

    /// Clears runtime fields back to a never-run state.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.result = None;
        self.error = None;
        self.retry_count = 0;
        self.start_time = None;
        self.end_time = None;
    }

}

/// An ordered, reusable blueprint of steps.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Template {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub steps: Vec<Step>,

    #[serde(default)]
    pub default_parameters: Context,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl Template {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            default_parameters: Context::new(),
            tags: Vec::new(),
            version: default_version(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
        self.default_parameters.insert(key, value);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Gets a step by ID.
    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Distinct capabilities used by the steps, sorted.
    pub fn capabilities(&self) -> Vec<String> {
        participating_capabilities(&self.steps)
    }

    /// Returns the number of steps in the template.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the template has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Derives the sorted set of distinct capabilities across `steps`.
pub fn participating_capabilities(steps: &[Step]) -> Vec<String> {
    let set: BTreeSet<&str> = steps.iter().map(|s| s.capability.as_str()).collect();
    set.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::retry::RetryStrategy;
    use serde_json::json;

    #[test]
    fn test_step_creation() {
        let step = Step::new(" research ", "market", "analyze_market")
            .with_parameter("category", json!("home"))
            .with_retry(RetryPolicy::new(RetryStrategy::LinearBackoff, 1, 15));

        assert_eq!(step.id, "research");
        assert_eq!(step.name, "research");
        assert_eq!(step.capability, "market");
        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(step.retry_policy.max_retries, 1);
        assert_eq!(step.parameters.get::<String>("category"), Some("home".to_string()));
    }

    #[test]
    fn test_step_depends_on_multiple() {
        let step = Step::new("launch", "executive", "approve")
            .depends_on("pricing")
            .depends_on("copy");

        assert_eq!(step.dependencies, vec!["pricing", "copy"]);
    }

    #[test]
    fn test_to_runtime_clears_state() {
        let mut step = Step::new("s", "market", "analyze").with_name("");
        step.status = StepStatus::Completed;
        step.result = Some(json!(1));
        step.retry_count = 2;
        step.start_time = Some(Utc::now());

        let runtime = step.to_runtime();
        assert_eq!(runtime.status, StepStatus::Pending);
        assert!(runtime.result.is_none());
        assert_eq!(runtime.retry_count, 0);
        assert!(runtime.start_time.is_none());
        assert_eq!(runtime.name, "s");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Retrying.is_terminal());
        assert!(!StepStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_result_kind_matches() {
        assert!(ResultKind::Any.matches(&json!(null)));
        assert!(ResultKind::Object.matches(&json!({"a": 1})));
        assert!(!ResultKind::Object.matches(&json!([1])));
        assert!(ResultKind::Number.matches(&json!(3.5)));
        assert!(!ResultKind::String.matches(&json!(3)));
        assert!(ResultKind::Bool.matches(&json!(false)));
    }

    #[test]
    fn test_step_yaml_flat_retry_keys() {
        let yaml = r#"
id: pricing
capability: market
operation: optimize_price
dependencies: [research]
retry_strategy: fixed_delay
max_retries: 4
timeout_seconds: 12
critical: true
result_kind: object
"#;
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.retry_policy.retry_strategy, RetryStrategy::FixedDelay);
        assert_eq!(step.retry_policy.max_retries, 4);
        assert_eq!(step.retry_policy.timeout_seconds, 12);
        assert!(step.critical);
        assert_eq!(step.result_kind, ResultKind::Object);
        assert_eq!(step.status, StepStatus::Pending);
    }

    #[test]
    fn test_template_capabilities_sorted_distinct() {
        let template = Template::new("t", "T")
            .with_step(Step::new("a", "market", "x"))
            .with_step(Step::new("b", "content", "y"))
            .with_step(Step::new("c", "market", "z"));

        assert_eq!(template.capabilities(), vec!["content", "market"]);
        assert_eq!(template.len(), 3);
        assert!(template.get_step("b").is_some());
        assert!(template.get_step("nope").is_none());
    }

    #[test]
    fn test_template_defaults() {
        let template: Template = serde_yaml::from_str("id: t\nsteps: []\n").unwrap();
        assert_eq!(template.version, "1.0.0");
        assert!(template.is_empty());
        assert!(template.default_parameters.is_empty());
    }
}
