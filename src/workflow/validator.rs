//! Template Validation
//!
//! Checks run when a template (or ad-hoc step list) is registered:
//! - Step field validation
//! - Dependency ordering (a step may only depend on steps declared before it)
//! - Cycle detection
//! - Command table bindings for every `(capability, operation)`

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info, warn};

use super::model::{Step, Template};
use crate::capability::CommandTable;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyTemplateId,
    EmptyTemplate,
    DuplicateStepId(String),
    EmptyStepId,
    EmptyCapability(String),
    EmptyOperation(String),
    ZeroTimeout(String),
    UnknownDependency { step: String, dependency: String },
    ForwardDependency { step: String, dependency: String },
    CyclicDependency,
    UnboundOperation { step: String, capability: String, operation: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTemplateId => write!(f, "Template has empty or whitespace-only ID"),
            Self::EmptyTemplate => write!(f, "Template has no steps"),
            Self::DuplicateStepId(id) => write!(f, "Duplicate step ID: '{}'", id),
            Self::EmptyStepId => write!(f, "Step has empty or whitespace-only ID"),
            Self::EmptyCapability(step) => write!(f, "Step '{}' has no capability specified", step),
            Self::EmptyOperation(step) => write!(f, "Step '{}' has no operation specified", step),
            Self::ZeroTimeout(step) => {
                write!(f, "Step '{}' must have timeout_seconds greater than 0", step)
            }
            Self::UnknownDependency { step, dependency } => {
                write!(f, "Step '{}' depends on unknown step '{}'", step, dependency)
            }
            Self::ForwardDependency { step, dependency } => write!(
                f,
                "Step '{}' depends on '{}', which is not declared before it",
                step, dependency
            ),
            Self::CyclicDependency => {
                write!(f, "Template contains cyclic dependencies (steps depend on each other in a loop)")
            }
            Self::UnboundOperation { step, capability, operation } => write!(
                f,
                "Step '{}': capability '{}' has no operation '{}'",
                step, capability, operation
            ),
        }
    }
}

/// Validates a single step's fields.
fn validate_step(step: &Step) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if step.id.trim().is_empty() {
        errors.push(ValidationError::EmptyStepId);
        return errors; // Can't validate further without ID
    }

    if step.capability.trim().is_empty() {
        errors.push(ValidationError::EmptyCapability(step.id.clone()));
    }

    if step.operation.trim().is_empty() {
        errors.push(ValidationError::EmptyOperation(step.id.clone()));
    }

    if step.retry_policy.timeout_seconds == 0 {
        errors.push(ValidationError::ZeroTimeout(step.id.clone()));
    }

    if step.critical && step.retry_policy.max_retries == 0 {
        warn!("Step '{}' is critical but has no retries", step.id);
    }

    if step.dependencies.is_empty() {
        debug!("Step '{}' is a root step (no dependencies)", step.id);
    }

    errors
}

/// Validates an ordered list of steps.
///
/// Returns every problem found, one per line.
pub fn validate_steps(steps: &[Step], commands: &CommandTable) -> Result<(), String> {
    if steps.is_empty() {
        return Err(ValidationError::EmptyTemplate.to_string());
    }

    let mut errors = Vec::new();
    let all_ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    let mut declared: HashSet<&str> = HashSet::new();

    for step in steps {
        errors.extend(validate_step(step));

        for dependency in &step.dependencies {
            if declared.contains(dependency.as_str()) {
                continue;
            }
            let error = if all_ids.contains(dependency.as_str()) {
                ValidationError::ForwardDependency {
                    step: step.id.clone(),
                    dependency: dependency.clone(),
                }
            } else {
                ValidationError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dependency.clone(),
                }
            };
            errors.push(error);
        }

        if !step.capability.is_empty()
            && !step.operation.is_empty()
            && !commands.contains(&step.capability, &step.operation)
        {
            errors.push(ValidationError::UnboundOperation {
                step: step.id.clone(),
                capability: step.capability.clone(),
                operation: step.operation.clone(),
            });
        }

        if !step.id.trim().is_empty() && !declared.insert(step.id.as_str()) {
            errors.push(ValidationError::DuplicateStepId(step.id.clone()));
        }
    }

    if !errors.is_empty() {
        let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(error_messages.join("\n"));
    }

    // Ordering already rules cycles out; keep the graph check independent of it.
    check_acyclic(steps)?;

    Ok(())
}

/// Validates a template before registration.
pub fn validate_template(template: &Template, commands: &CommandTable) -> Result<(), String> {
    info!(
        "Validating template '{}' with {} steps",
        template.id,
        template.steps.len()
    );

    if template.id.trim().is_empty() {
        return Err(ValidationError::EmptyTemplateId.to_string());
    }

    validate_steps(&template.steps, commands)?;

    info!(
        "Template '{}' validated: {} steps, capabilities {:?}",
        template.id,
        template.steps.len(),
        template.capabilities()
    );
    Ok(())
}

/// Detects dependency cycles using Kahn's algorithm.
fn check_acyclic(steps: &[Step]) -> Result<(), String> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in steps {
        in_degree.insert(step.id.as_str(), step.dependencies.len());
        for dependency in &step.dependencies {
            dependents
                .entry(dependency.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = steps
        .iter()
        .filter(|s| s.dependencies.is_empty())
        .map(|s| s.id.as_str())
        .collect();

    let mut visited = 0;
    while let Some(current) = queue.pop_front() {
        visited += 1;
        for &dependent in dependents.get(current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    if visited != steps.len() {
        return Err(ValidationError::CyclicDependency.to_string());
    }

    Ok(())
}
