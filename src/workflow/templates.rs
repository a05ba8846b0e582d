//! Built-in seller templates shipped with the crate.

use super::model::Template;
use super::parser::parse_templates;

const BUILTIN_YAML: &str = include_str!("../../templates/seller_workflows.yaml");

/// Parses the built-in templates.
pub fn builtin() -> Result<Vec<Template>, String> {
    parse_templates(BUILTIN_YAML)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CommandTable;
    use crate::error::CapabilityError;
    use crate::workflow::context::Context;
    use crate::workflow::validator::validate_template;
    use serde_json::json;

    #[test]
    fn test_builtin_templates_parse() {
        let templates = builtin().unwrap();
        let ids: Vec<&str> = templates.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["product_launch", "inventory_restock", "price_optimization", "support_escalation"]
        );
    }

    #[test]
    fn test_builtin_templates_validate_when_bound() {
        let templates = builtin().unwrap();
        let mut commands = CommandTable::new();
        for template in &templates {
            for step in &template.steps {
                commands.register(step.capability.clone(), step.operation.clone(), |_: Context| async {
                    Ok::<_, CapabilityError>(json!({}))
                });
            }
        }

        for template in &templates {
            assert!(validate_template(template, &commands).is_ok(), "{}", template.id);
        }
    }

    #[test]
    fn test_product_launch_approval_is_critical() {
        let templates = builtin().unwrap();
        let launch = templates.iter().find(|t| t.id == "product_launch").unwrap();
        let approval = launch.get_step("launch_approval").unwrap();
        assert!(approval.critical);
        assert_eq!(approval.dependencies.len(), 3);
        assert_eq!(launch.capabilities(), vec!["content", "executive", "logistics", "market"]);
    }
}
