//! Coverage plugin: files below the configured threshold become
//! `add_test` tasks. Fingerprints hash file plus rounded percentage, so
//! a re-collect at the same coverage level re-identifies the same gap.

use std::collections::HashMap;

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

pub struct CoveragePlugin;

impl CoveragePlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CoveragePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for CoveragePlugin {
    fn id(&self) -> &str {
        "coverage"
    }

    async fn collect(&self, rc: &RunContext) -> Result<ArtifactSet> {
        let profile = rc.probe.detect(&rc.repo_path);
        let invocation = rc.probe.resolve_python(&profile);

        let output_dir = rc.artifact_root.join(self.id());
        tokio::fs::create_dir_all(&output_dir)
            .await
            .context("failed to create coverage artifact directory")?;

        let report_path = output_dir.join("coverage.json");
        let stdout_path = output_dir.join("stdout.log");
        let stderr_path = output_dir.join("stderr.log");

        let args = invocation.command([
            "-m".to_string(),
            "pytest".to_string(),
            "--cov=.".to_string(),
            format!("--cov-report=json:{}", report_path.display()),
            "--cov-report=term".to_string(),
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
            .context("coverage collect run failed")?;

        let items = vec![
            artifact_record(&rc.run_id, self.id(), "report", &report_path),
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
            bail!("coverage report artifact missing");
        };

        let data = tokio::fs::read(&report.path)
            .await
            .with_context(|| format!("failed to read coverage report {}", report.path))?;
        let parsed: CoverageReport =
            serde_json::from_slice(&data).context("failed to parse coverage report")?;

        let threshold_pct = rc.config.coverage.minimum_threshold * 100.0;
        let now = Utc::now();
        let mut findings = Vec::new();
        // Sort for deterministic output; the report's file map is unordered.
        let mut files: Vec<(&String, &CoverageFile)> = parsed.files.iter().collect();
        files.sort_by(|a, b| a.0.cmp(b.0));

        for (file, details) in files {
            let percent = details.summary.percent_covered;
            if percent >= threshold_pct {
                continue;
            }

            let rounded = format!("{percent:.2}");
            findings.push(FindingRecord {
                run_id: rc.run_id.clone(),
                tool: self.id().to_string(),
                kind: "coverage_gap".to_string(),
                severity: Severity::Medium,
                fingerprint: fingerprint(&[file.as_str(), rounded.as_str()]),
                message: format!("Coverage {percent:.1}% below threshold {threshold_pct:.1}%"),
                file_path: Some(file.clone()),
                line: None,
                col: None,
                symbol: None,
                test_id: None,
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

        let mut files: Vec<&str> = findings
            .iter()
            .filter_map(|f| f.file_path.as_deref())
            .collect();
        files.sort_unstable();

        let retry_policy = serde_json::json!({ "max_attempts": rc.config.retry_cap }).to_string();
        let now = Utc::now();
        let mut tasks = Vec::with_capacity(files.len());
        for file in files {
            let targets = serde_json::json!({ "files": [file] });
            tasks.push(TaskRecord {
                id: 0,
                run_id: rc.run_id.clone(),
                tool: self.id().to_string(),
                task_type: TaskType::AddTest,
                priority: 50,
                status: TaskStatus::Queued,
                fingerprint: fingerprint(&["coverage", file]),
                title: format!("Improve coverage for {file}"),
                description: format!("Add tests to raise coverage for {file}."),
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
        let targets: CoverageTargets = serde_json::from_str(&task.targets_json)
            .context("failed to parse coverage task targets")?;

        let profile = rc.probe.detect(&rc.repo_path);
        let invocation = rc.probe.resolve_python(&profile);

        let cov_scope = targets
            .files
            .first()
            .map(|file| format!("--cov={file}"))
            .unwrap_or_else(|| "--cov=.".to_string());
        let args = vec![
            "-m".to_string(),
            "pytest".to_string(),
            cov_scope,
            "--cov-report=json".to_string(),
        ];

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
struct CoverageTargets {
    files: Vec<String>,
}

// ---------------------------------------------------------------------------
// coverage.py JSON report shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CoverageReport {
    files: HashMap<String, CoverageFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CoverageFile {
    summary: CoverageSummary,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CoverageSummary {
    percent_covered: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_parses_file_summaries() {
        let report: CoverageReport = serde_json::from_value(serde_json::json!({
            "files": {
                "src/a.py": {"summary": {"percent_covered": 50.0}},
                "src/b.py": {"summary": {"percent_covered": 97.5}}
            },
            "totals": {"percent_covered": 73.75}
        }))
        .unwrap();
        assert_eq!(report.files.len(), 2);
        assert!((report.files["src/a.py"].summary.percent_covered - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gap_fingerprint_rounds_percentage() {
        let a_pct = format!("{:.2}", 50.0_f64);
        let b_pct = format!("{:.2}", 50.001_f64);
        let a = fingerprint(&["src/a.py", a_pct.as_str()]);
        let b = fingerprint(&["src/a.py", b_pct.as_str()]);
        assert_eq!(a, b);
    }
}
