//! pytest plugin: failing tests become `fix` tasks.
//!
//! Collect runs the suite once with JSON and junit reporting enabled.
//! Normalize reads the JSON report; each failed or errored test becomes
//! one `test_failure` finding fingerprinted by node id, outcome, and
//! primary message. Plan chunks findings one file per task.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use atqos_store::models::{FindingRecord, Severity, TaskRecord, TaskStatus, TaskType};

use super::{artifact_record, fingerprint};
use crate::context::RunContext;
use crate::plugin::{ArtifactSet, Plugin};
use crate::runner::Command;
use crate::validation::{CommandSpec, SuccessCriteria, ValidationSpec};

pub struct PytestPlugin;

impl PytestPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PytestPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for PytestPlugin {
    fn id(&self) -> &str {
        "pytest"
    }

    async fn collect(&self, rc: &RunContext) -> Result<ArtifactSet> {
        let profile = rc.probe.detect(&rc.repo_path);
        let invocation = rc.probe.resolve_python(&profile);

        let output_dir = rc.artifact_root.join(self.id());
        tokio::fs::create_dir_all(&output_dir)
            .await
            .context("failed to create pytest artifact directory")?;

        let report_path = output_dir.join("report.json");
        let junit_path = output_dir.join("junit.xml");
        let stdout_path = output_dir.join("stdout.log");
        let stderr_path = output_dir.join("stderr.log");

        let args = invocation.command([
            "-m".to_string(),
            "pytest".to_string(),
            "--json-report".to_string(),
            format!("--json-report-file={}", report_path.display()),
            format!("--junitxml={}", junit_path.display()),
            "-ra".to_string(),
            "--showlocals".to_string(),
        ]);

        rc.runners
            .get("python")
            .run(Command {
                args,
                cwd: Some(rc.repo_path.clone()),
                allow_nonzero: true,
                stdout_path: Some(stdout_path.clone()),
                stderr_path: Some(stderr_path.clone()),
                ..Command::default()
            })
            .await
            .context("pytest collect run failed")?;

        let items = vec![
            artifact_record(&rc.run_id, self.id(), "report", &report_path),
            artifact_record(&rc.run_id, self.id(), "junit", &junit_path),
            artifact_record(&rc.run_id, self.id(), "stdout", &stdout_path),
            artifact_record(&rc.run_id, self.id(), "stderr", &stderr_path),
        ];

        Ok(ArtifactSet {
            plugin_id: self.id().to_string(),
            items,
        })
    }

    async fn normalize(
        &self,
        rc: &RunContext,
        artifacts: &ArtifactSet,
    ) -> Result<Vec<FindingRecord>> {
        let Some(report) = artifacts.items.iter().find(|a| a.kind == "report") else {
            bail!("pytest report artifact missing");
        };

        let data = tokio::fs::read(&report.path)
            .await
            .with_context(|| format!("failed to read pytest report {}", report.path))?;
        let parsed: PytestReport =
            serde_json::from_slice(&data).context("failed to parse pytest report")?;

        let now = Utc::now();
        let mut findings = Vec::new();
        for test in &parsed.tests {
            if test.outcome != "failed" && test.outcome != "error" {
                continue;
            }

            let mut message = test
                .longrepr
                .as_ref()
                .map(Longrepr::message)
                .unwrap_or_default();
            if message.is_empty() {
                message = test.call.crash.message.clone();
            }

            let severity = if test.outcome == "error" {
                Severity::Blocker
            } else {
                Severity::High
            };

            findings.push(FindingRecord {
                run_id: rc.run_id.clone(),
                tool: self.id().to_string(),
                kind: "test_failure".to_string(),
                severity,
                fingerprint: fingerprint(&[test.nodeid.as_str(), test.outcome.as_str(), &message]),
                message,
                file_path: node_id_file(&test.nodeid),
                line: None,
                col: None,
                symbol: None,
                test_id: Some(test.nodeid.clone()),
                raw_ref: Some(report.path.clone()),
                meta_json: None,
                created_at: now,
            });
        }

        Ok(findings)
    }

    async fn plan(&self, rc: &RunContext, findings: &[FindingRecord]) -> Result<Vec<TaskRecord>> {
        if findings.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_file: BTreeMap<String, Vec<&FindingRecord>> = BTreeMap::new();
        for finding in findings {
            let file = finding
                .file_path
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            by_file.entry(file).or_default().push(finding);
        }

        let retry_policy = serde_json::json!({ "max_attempts": rc.config.retry_cap }).to_string();
        let now = Utc::now();
        let mut tasks = Vec::with_capacity(by_file.len());
        for (file, file_findings) in &by_file {
            let test_ids: Vec<&str> = file_findings
                .iter()
                .filter_map(|f| f.test_id.as_deref())
                .collect();
            let targets = serde_json::json!({
                "files": [file],
                "test_ids": test_ids,
            });

            tasks.push(TaskRecord {
                id: 0,
                run_id: rc.run_id.clone(),
                tool: self.id().to_string(),
                task_type: TaskType::Fix,
                priority: 100,
                status: TaskStatus::Queued,
                fingerprint: fingerprint(&["pytest", file.as_str()]),
                title: format!("Fix pytest failures in {file}"),
                description: format!("Resolve pytest failures for {file}."),
                targets_json: targets.to_string(),
                validation_json: String::new(),
                retry_policy_json: retry_policy.clone(),
                depends_on_json: None,
                extra_json: None,
                claimed_by: None,
                claimed_at: None,
                created_at: now,
                updated_at: now,
            });
        }

        Ok(tasks)
    }

    async fn validation_spec(&self, rc: &RunContext, task: &TaskRecord) -> Result<ValidationSpec> {
        let targets: PytestTargets = serde_json::from_str(&task.targets_json)
            .context("failed to parse pytest task targets")?;

        let profile = rc.probe.detect(&rc.repo_path);
        let invocation = rc.probe.resolve_python(&profile);

        let mut args = vec!["-m".to_string(), "pytest".to_string(), "-q".to_string()];
        if !targets.test_ids.is_empty() {
            args.extend(targets.test_ids);
        } else {
            args.extend(targets.files);
        }

        Ok(ValidationSpec {
            commands: vec![CommandSpec {
                runner: "python".to_string(),
                args: invocation.command(args),
                env: Default::default(),
                cwd: Some(rc.repo_path.to_string_lossy().into_owned()),
                timeout_seconds: None,
            }],
            success_criteria: SuccessCriteria {
                require_exit_code_0: true,
                max_new_findings: None,
                min_coverage_delta: None,
            },
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PytestTargets {
    files: Vec<String>,
    test_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// pytest-json-report shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PytestReport {
    tests: Vec<PytestTest>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PytestTest {
    nodeid: String,
    outcome: String,
    longrepr: Option<Longrepr>,
    call: CallInfo,
}

/// The report renders `longrepr` either as a plain string or as a
/// structured crash/traceback object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Longrepr {
    Text(String),
    Repr {
        #[serde(default)]
        reprcrash: ReprCrash,
        #[serde(default)]
        reprtraceback: ReprTraceback,
    },
}

impl Longrepr {
    fn message(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Repr {
                reprcrash,
                reprtraceback,
            } => {
                if !reprcrash.message.is_empty() {
                    return reprcrash.message.clone();
                }
                reprtraceback
                    .reprentries
                    .first()
                    .map(|entry| entry.data.clone())
                    .unwrap_or_default()
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReprCrash {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReprTraceback {
    reprentries: Vec<ReprEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReprEntry {
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CallInfo {
    crash: Crash,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Crash {
    message: String,
}

/// The file portion of a pytest node id (`tests/test_x.py::test_a`).
fn node_id_file(nodeid: &str) -> Option<String> {
    if nodeid.is_empty() {
        return None;
    }
    Some(nodeid.split("::").next().unwrap_or(nodeid).to_string())
}
