//! Frozen validation specs.
//!
//! A task's validation spec is produced once by the owning plugin, stored
//! as an opaque JSON blob on the task row, and deserialized verbatim by
//! the worker that executes the attempt. The kernel runs these commands
//! itself; agent self-reports never substitute for them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One command in a validation sequence, addressed to a named runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub runner: String,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// Criteria the validation outcome is judged against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriteria {
    pub require_exit_code_0: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_new_findings: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_coverage_delta: Option<f64>,
}

/// The full deterministic command sequence verifying one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSpec {
    pub commands: Vec<CommandSpec>,
    pub success_criteria: SuccessCriteria,
}

impl ValidationSpec {
    /// Render each command as a single display string, the verbatim form
    /// handed to agents inside the request.
    pub fn command_lines(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.args.join(" ")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> ValidationSpec {
        ValidationSpec {
            commands: vec![CommandSpec {
                runner: "python".to_string(),
                args: vec![
                    "python".to_string(),
                    "-m".to_string(),
                    "pytest".to_string(),
                    "-q".to_string(),
                ],
                env: HashMap::new(),
                cwd: Some("/tmp/repo".to_string()),
                timeout_seconds: None,
            }],
            success_criteria: SuccessCriteria {
                require_exit_code_0: true,
                max_new_findings: None,
                min_coverage_delta: None,
            },
        }
    }

    #[test]
    fn serde_roundtrip_preserves_spec() {
        let spec = sample_spec();
        let json = serde_json::to_string(&spec).expect("serialize");
        let back: ValidationSpec = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(spec, back);
    }

    #[test]
    fn empty_spec_roundtrips() {
        let spec = ValidationSpec::default();
        let json = serde_json::to_string(&spec).expect("serialize");
        let back: ValidationSpec = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(spec, back);
        assert!(back.commands.is_empty());
    }

    #[test]
    fn command_lines_joins_args() {
        let spec = sample_spec();
        assert_eq!(spec.command_lines(), vec!["python -m pytest -q"]);
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let spec = ValidationSpec {
            commands: vec![CommandSpec {
                runner: "generic".to_string(),
                args: vec!["true".to_string()],
                env: HashMap::new(),
                cwd: None,
                timeout_seconds: None,
            }],
            success_criteria: SuccessCriteria::default(),
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(!json.contains("cwd"));
        assert!(!json.contains("timeout_seconds"));
        assert!(!json.contains("max_new_findings"));
    }
}
