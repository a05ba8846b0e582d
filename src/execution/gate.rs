//! Dependency Gate
//!
//! Decides whether the step under the cursor may run. Steps are visited in
//! template order only; a step whose dependency is missing or not Completed
//! is skipped for good rather than deferred.

use crate::error::OrchestrationError;
use crate::workflow::{Step, StepStatus};

/// Returns `Ok(())` when every dependency of `step` is Completed in `steps`.
///
/// Otherwise returns [`OrchestrationError::DependencyUnmet`] naming the first
/// dependency that blocks it.
pub fn check_dependencies(step: &Step, steps: &[Step]) -> Result<(), OrchestrationError> {
    for dependency in &step.dependencies {
        let completed = steps
            .iter()
            .find(|s| s.id == *dependency)
            .map(|s| s.status == StepStatus::Completed)
            .unwrap_or(false);

        if !completed {
            return Err(OrchestrationError::DependencyUnmet {
                step_id: step.id.clone(),
                dependency: dependency.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_status(id: &str, status: StepStatus) -> Step {
        let mut step = Step::new(id, "market", "analyze");
        step.status = status;
        step
    }

    #[test]
    fn test_no_dependencies_is_ready() {
        let step = Step::new("a", "market", "analyze");
        assert!(check_dependencies(&step, &[]).is_ok());
    }

    #[test]
    fn test_all_completed_is_ready() {
        let steps = vec![
            with_status("a", StepStatus::Completed),
            with_status("b", StepStatus::Completed),
        ];
        let step = Step::new("c", "content", "write").depends_on("a").depends_on("b");
        assert!(check_dependencies(&step, &steps).is_ok());
    }

    #[test]
    fn test_non_completed_dependency_blocks() {
        for status in [
            StepStatus::Pending,
            StepStatus::Failed,
            StepStatus::Skipped,
            StepStatus::InProgress,
            StepStatus::Retrying,
        ] {
            let steps = vec![with_status("a", StepStatus::Completed), with_status("b", status)];
            let step = Step::new("c", "content", "write").depends_on("a").depends_on("b");
            match check_dependencies(&step, &steps) {
                Err(OrchestrationError::DependencyUnmet { step_id, dependency }) => {
                    assert_eq!(step_id, "c");
                    assert_eq!(dependency, "b");
                }
                other => panic!("expected DependencyUnmet for {:?}, got {:?}", status, other),
            }
        }
    }

    #[test]
    fn test_missing_dependency_blocks() {
        let step = Step::new("c", "content", "write").depends_on("ghost");
        assert!(check_dependencies(&step, &[with_status("a", StepStatus::Completed)]).is_err());
    }
}
