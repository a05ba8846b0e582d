//! Template Parser
//!
//! Handles loading and parsing template definitions from YAML files.
//! Parsing only checks structure; semantic validation happens when a
//! template is registered, since it needs the capability bindings.

use std::error::Error;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::Deserialize;

use super::model::Template;

/// Top-level layout of a template file.
#[derive(Deserialize, Debug)]
struct TemplateFile {
    templates: Vec<Template>,
}

/// Parses templates from a YAML document with a top-level `templates:` list.
pub fn parse_templates(yaml_content: &str) -> Result<Vec<Template>, String> {
    let file: TemplateFile = serde_yaml::from_str(yaml_content)
        .map_err(|e| format!("Failed to parse template YAML: {}. Check the file format.", e))?;

    let mut templates = file.templates;
    for template in &mut templates {
        normalize(template);
    }

    debug!("Parsed {} templates", templates.len());
    Ok(templates)
}

/// Loads templates from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use sellerflow::workflow::load_templates;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let templates = load_templates("templates.yaml")?;
///     println!("Loaded {} templates", templates.len());
///     Ok(())
/// }
/// ```
pub fn load_templates(path: impl AsRef<Path>) -> Result<Vec<Template>, Box<dyn Error>> {
    let path = path.as_ref();
    info!("Loading templates from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read template file '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        )
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let templates = parse_templates(&yaml_content)?;
    info!("Parsed {} templates from {}", templates.len(), path.display());
    Ok(templates)
}

/// Trims identifiers and fills in names that were left out.
fn normalize(template: &mut Template) {
    template.id = template.id.trim().to_string();
    if template.name.is_empty() {
        template.name = template.id.clone();
    }
    for step in &mut template.steps {
        step.id = step.id.trim().to_string();
        step.capability = step.capability.trim().to_string();
        step.operation = step.operation.trim().to_string();
        if step.name.is_empty() {
            step.name = step.id.clone();
        }
        for dependency in &mut step.dependencies {
            *dependency = dependency.trim().to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::StepStatus;
    use crate::workflow::retry::RetryStrategy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
templates:
  - id: " restock "
    description: Reorder low inventory
    tags: [inventory]
    default_parameters:
      threshold: 10
    steps:
      - id: check_stock
        capability: logistics
        operation: check_inventory
        retry_strategy: fixed_delay
        max_retries: 1
        timeout_seconds: 20
      - id: reorder
        name: Place reorder
        capability: logistics
        operation: create_purchase_order
        dependencies: [" check_stock "]
        critical: true
"#;

    #[test]
    fn test_parse_templates() {
        let templates = parse_templates(SAMPLE).unwrap();
        assert_eq!(templates.len(), 1);

        let template = &templates[0];
        assert_eq!(template.id, "restock");
        assert_eq!(template.name, "restock");
        assert_eq!(template.tags, vec!["inventory"]);
        assert_eq!(template.default_parameters.get::<i64>("threshold"), Some(10));
        assert_eq!(template.steps.len(), 2);

        let check = &template.steps[0];
        assert_eq!(check.name, "check_stock");
        assert_eq!(check.retry_policy.retry_strategy, RetryStrategy::FixedDelay);
        assert_eq!(check.status, StepStatus::Pending);

        let reorder = &template.steps[1];
        assert_eq!(reorder.name, "Place reorder");
        assert_eq!(reorder.dependencies, vec!["check_stock"]);
        assert!(reorder.critical);
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = parse_templates("templates: [ {id: x").unwrap_err();
        assert!(err.contains("Failed to parse template YAML"));
    }

    #[test]
    fn test_parse_missing_required_field() {
        let err = parse_templates("templates:\n  - id: t\n    steps:\n      - id: s\n        capability: c\n")
            .unwrap_err();
        assert!(err.contains("operation"));
    }

    #[test]
    fn test_load_templates_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let templates = load_templates(file.path()).unwrap();
        assert_eq!(templates[0].id, "restock");
    }

    #[test]
    fn test_load_templates_missing_file() {
        let err = load_templates("/nonexistent/templates.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read template file"));
    }
}
