//! Flow loader - YAML file loading and parsing

use super::definition::FlowDefinition;
use crate::error::FlowError;
use std::fs;
use std::path::Path;

/// Loads flow definitions from YAML files
pub struct FlowLoader;

impl FlowLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a flow definition from a YAML file
    pub fn load_flow<P: AsRef<Path>>(&self, path: P) -> Result<FlowDefinition, FlowError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            FlowError::definition(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse_yaml(&content)
    }

    /// Parse a flow definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<FlowDefinition, FlowError> {
        let def: FlowDefinition = serde_yaml::from_str(content)?;
        if def.steps.is_empty() {
            return Err(FlowError::definition(format!("flow '{}' declares no steps", def.name)));
        }
        Ok(def)
    }
}

impl Default for FlowLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_branching_flow() {
        let yaml = r#"
name: branching
description: "Fan out and join"
steps:
  - name: start
    body: noop
    next: [left, right]
  - name: left
    catch: left_failed
    next: join
  - name: right
    next: join
  - name: join
    body: noop
    join: true
    next: end
  - name: end
    body: noop
report:
  flags: [left_failed]
"#;
        let def = FlowLoader::parse_yaml(yaml).unwrap();
        assert_eq!(def.name, "branching");
        assert_eq!(def.steps.len(), 5);
        assert_eq!(def.steps[0].next.to_vec(), vec!["left", "right"]);
        assert!(def.steps[3].join);
        assert_eq!(def.report.unwrap().flags, vec!["left_failed"]);
    }

    #[test]
    fn test_parse_without_report() {
        let yaml = r#"
name: single
steps:
  - name: only
"#;
        let def = FlowLoader::parse_yaml(yaml).unwrap();
        assert!(def.report.is_none());
        assert!(def.description.is_empty());
    }

    #[test]
    fn test_rejects_empty_flow() {
        let err = FlowLoader::parse_yaml("name: empty\n").unwrap_err();
        assert!(matches!(err, FlowError::Definition(_)));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = FlowLoader::parse_yaml("name: [unclosed").unwrap_err();
        assert!(matches!(err, FlowError::Yaml(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = FlowLoader::new()
            .load_flow("/no/such/flow.yaml")
            .unwrap_err();
        assert!(matches!(err, FlowError::Definition(_)));
    }
}
