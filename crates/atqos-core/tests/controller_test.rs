//! End-to-end run controller tests driven through stub plugins, so no
//! Python toolchain is needed.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use atqos_core::agent::LocalAgent;
use atqos_core::context::RunContext;
use atqos_core::controller::RunCommand;
use atqos_core::plugin::{ArtifactSet, Plugin};
use atqos_core::validation::{CommandSpec, SuccessCriteria, ValidationSpec};
use atqos_store::models::{
    ArtifactRecord, FindingRecord, RunStatus, Severity, TaskRecord, TaskStatus, TaskType,
};
use atqos_store::SqliteStore;

/// Stub plugin: always writes a report artifact; optionally emits one
/// failing-test finding with a matching fix task.
struct StubPlugin {
    emit_finding: bool,
}

#[async_trait]
impl Plugin for StubPlugin {
    fn id(&self) -> &str {
        "stub"
    }

    async fn collect(&self, rc: &RunContext) -> Result<ArtifactSet> {
        let dir = rc.artifact_root.join(self.id());
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join("report.json");
        tokio::fs::write(&path, b"{\"tests\":[]}").await?;
        Ok(ArtifactSet {
            plugin_id: self.id().to_string(),
            items: vec![ArtifactRecord {
                run_id: rc.run_id.clone(),
                tool: Some(self.id().to_string()),
                kind: "report".to_string(),
                path: path.to_string_lossy().into_owned(),
                sha256: None,
                size_bytes: 12,
                created_at: Utc::now(),
                meta_json: None,
            }],
        })
    }

    async fn normalize(&self, rc: &RunContext, _: &ArtifactSet) -> Result<Vec<FindingRecord>> {
        if !self.emit_finding {
            return Ok(Vec::new());
        }
        Ok(vec![FindingRecord {
            run_id: rc.run_id.clone(),
            tool: self.id().to_string(),
            kind: "test_failure".to_string(),
            severity: Severity::High,
            fingerprint: "stub-finding".to_string(),
            message: "assert 1 == 2".to_string(),
            file_path: Some("tests/test_x.py".to_string()),
            line: None,
            col: None,
            symbol: None,
            test_id: Some("tests/test_x.py::test_a".to_string()),
            raw_ref: None,
            meta_json: None,
            created_at: Utc::now(),
        }])
    }

    async fn plan(&self, rc: &RunContext, findings: &[FindingRecord]) -> Result<Vec<TaskRecord>> {
        if findings.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        Ok(vec![TaskRecord {
            id: 0,
            run_id: rc.run_id.clone(),
            tool: self.id().to_string(),
            task_type: TaskType::Fix,
            priority: 100,
            status: TaskStatus::Queued,
            fingerprint: "stub-task".to_string(),
            title: "Fix pytest failures in tests/test_x.py".to_string(),
            description: "Resolve pytest failures for tests/test_x.py.".to_string(),
            targets_json: r#"{"files":["tests/test_x.py"]}"#.to_string(),
            validation_json: String::new(),
            retry_policy_json: r#"{"max_attempts":2}"#.to_string(),
            depends_on_json: None,
            extra_json: None,
            claimed_by: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }])
    }

    async fn validation_spec(&self, _: &RunContext, _: &TaskRecord) -> Result<ValidationSpec> {
        Ok(ValidationSpec {
            commands: vec![CommandSpec {
                runner: "generic".to_string(),
                args: vec!["true".to_string()],
                env: Default::default(),
                cwd: None,
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

/// Plugin whose collect always fails.
struct BrokenPlugin;

#[async_trait]
impl Plugin for BrokenPlugin {
    fn id(&self) -> &str {
        "broken"
    }

    async fn collect(&self, _: &RunContext) -> Result<ArtifactSet> {
        bail!("tool binary missing")
    }

    async fn normalize(&self, _: &RunContext, _: &ArtifactSet) -> Result<Vec<FindingRecord>> {
        Ok(Vec::new())
    }

    async fn plan(&self, _: &RunContext, _: &[FindingRecord]) -> Result<Vec<TaskRecord>> {
        Ok(Vec::new())
    }

    async fn validation_spec(&self, _: &RunContext, _: &TaskRecord) -> Result<ValidationSpec> {
        Ok(ValidationSpec::default())
    }
}

struct Setup {
    command: RunCommand,
    _dir: TempDir,
}

fn setup() -> Setup {
    let dir = TempDir::new().expect("temp dir");
    let repo = dir.path().join("repo");
    std::fs::create_dir_all(repo.join("tests")).unwrap();
    std::fs::write(repo.join("tests").join("test_x.py"), "def test_a():\n    pass\n").unwrap();

    // in_place keeps the worker out of git; the stub validation commands
    // run anywhere.
    let config_path = dir.path().join("config.json");
    std::fs::write(&config_path, r#"{"git_strategy": "in_place"}"#).unwrap();

    let command = RunCommand {
        repo_path: repo,
        artifact_dir: dir.path().join("artifacts"),
        db_path: dir.path().join("artifacts").join("atqos.db"),
        config_path: Some(config_path),
    };
    Setup { command, _dir: dir }
}

fn event_types(command: &RunCommand, run_id: &str) -> Vec<String> {
    let path = command.artifact_dir.join(run_id).join("events.jsonl");
    let contents = std::fs::read_to_string(path).expect("events.jsonl");
    contents
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("line parses");
            value["event_type"].as_str().expect("event_type").to_string()
        })
        .collect()
}

#[tokio::test]
async fn clean_repo_yields_empty_successful_run() {
    let setup = setup();
    let outcome = setup
        .command
        .run_with(
            CancellationToken::new(),
            vec![Arc::new(StubPlugin {
                emit_finding: false,
            })],
            Arc::new(LocalAgent::new()),
        )
        .await
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(outcome.summary.findings, 0);
    assert_eq!(outcome.summary.tasks, 0);

    let store = SqliteStore::open(&setup.command.db_path).expect("open db");
    let summary = store.get_run_summary(&outcome.run_id).expect("summary");
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.findings, 0);
    assert_eq!(summary.tasks, 0);
    assert!(summary.finished.is_some());

    let artifacts = store.list_artifacts(&outcome.run_id).expect("artifacts");
    assert!(artifacts.iter().any(|a| a.kind == "report"));
    assert!(artifacts
        .iter()
        .any(|a| a.kind == "summary" && a.tool.is_none()));

    // The summary artifact parses and reflects the terminal state.
    let report_path = setup
        .command
        .artifact_dir
        .join(&outcome.run_id)
        .join("summary.json");
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(report["status"], "succeeded");
    assert_eq!(report["findings"], 0);

    let events = event_types(&setup.command, &outcome.run_id);
    for expected in ["run_started", "collect_started", "collect_finished", "run_finished"] {
        assert!(
            events.iter().any(|e| e == expected),
            "missing event {expected}, got {events:?}"
        );
    }
    assert_eq!(events.first().map(String::as_str), Some("run_started"));
    assert_eq!(events.last().map(String::as_str), Some("run_finished"));
}

#[tokio::test]
async fn single_failing_test_produces_one_task_and_one_attempt() {
    let setup = setup();
    let outcome = setup
        .command
        .run_with(
            CancellationToken::new(),
            vec![Arc::new(StubPlugin { emit_finding: true })],
            Arc::new(LocalAgent::new()),
        )
        .await
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(outcome.summary.findings, 1);
    assert_eq!(outcome.summary.tasks, 1);

    let store = SqliteStore::open(&setup.command.db_path).expect("open db");

    let findings = store.list_findings(&outcome.run_id).expect("findings");
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind, "test_failure");
    assert_eq!(findings[0].severity, Severity::High);
    assert_eq!(findings[0].file_path.as_deref(), Some("tests/test_x.py"));

    let tasks = store.list_tasks(&outcome.run_id).expect("tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_type, TaskType::Fix);
    assert_eq!(tasks[0].priority, 100);
    assert_eq!(tasks[0].status, TaskStatus::Succeeded);
    let targets: serde_json::Value = serde_json::from_str(&tasks[0].targets_json).unwrap();
    assert_eq!(targets["files"], serde_json::json!(["tests/test_x.py"]));
    // The kernel froze the plugin's validation spec onto the task.
    let spec: ValidationSpec = serde_json::from_str(&tasks[0].validation_json).unwrap();
    assert_eq!(spec.commands.len(), 1);
    assert!(spec.success_criteria.require_exit_code_0);

    let attempts = store.list_attempts(tasks[0].id).expect("attempts");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_no, 1);
    assert_eq!(attempts[0].agent_name.as_deref(), Some("local"));

    let events = event_types(&setup.command, &outcome.run_id);
    assert!(events.iter().any(|e| e == "task_claimed"));
    assert!(events.iter().any(|e| e == "attempt_started"));
    assert!(events.iter().any(|e| e == "attempt_finished"));
}

#[tokio::test]
async fn plugin_collect_failure_marks_the_run_failed() {
    let setup = setup();
    let result = setup
        .command
        .run_with(
            CancellationToken::new(),
            vec![Arc::new(BrokenPlugin)],
            Arc::new(LocalAgent::new()),
        )
        .await;
    assert!(result.is_err());

    let store = SqliteStore::open(&setup.command.db_path).expect("open db");
    // One run exists and it is failed; the run id is not returned on the
    // error path, so find it through the artifact directory name.
    let run_dir = std::fs::read_dir(&setup.command.artifact_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .find(|e| e.path().is_dir())
        .expect("artifact root exists");
    let run_id = run_dir.file_name().to_string_lossy().into_owned();

    let summary = store.get_run_summary(&run_id).expect("summary");
    assert_eq!(summary.status, RunStatus::Failed);

    let command = &setup.command;
    let events = event_types(command, &run_id);
    assert!(events.iter().any(|e| e == "run_failed"));
}

#[tokio::test]
async fn missing_repo_path_fails_before_any_run_is_created() {
    let dir = TempDir::new().unwrap();
    let command = RunCommand {
        repo_path: dir.path().join("nonexistent"),
        artifact_dir: dir.path().join("artifacts"),
        db_path: dir.path().join("artifacts").join("atqos.db"),
        config_path: None,
    };

    let result = command
        .run_with(
            CancellationToken::new(),
            vec![Arc::new(StubPlugin {
                emit_finding: false,
            })],
            Arc::new(LocalAgent::new()),
        )
        .await;
    assert!(result.is_err());
    // No artifacts, no database.
    assert!(!command.artifact_dir.exists());
}

#[tokio::test]
async fn disabled_plugins_are_skipped() {
    let setup = setup();
    // The stub id is unknown to the config, so it stays enabled; pytest
    // and coverage sections govern only their own plugins. Disable
    // nothing here, but prove an explicitly disabled id is skipped by
    // running with the pytest id.
    struct NamedStub;
    #[async_trait]
    impl Plugin for NamedStub {
        fn id(&self) -> &str {
            "pytest"
        }
        async fn collect(&self, _: &RunContext) -> Result<ArtifactSet> {
            bail!("collect should not run for a disabled plugin")
        }
        async fn normalize(&self, _: &RunContext, _: &ArtifactSet) -> Result<Vec<FindingRecord>> {
            Ok(Vec::new())
        }
        async fn plan(&self, _: &RunContext, _: &[FindingRecord]) -> Result<Vec<TaskRecord>> {
            Ok(Vec::new())
        }
        async fn validation_spec(&self, _: &RunContext, _: &TaskRecord) -> Result<ValidationSpec> {
            Ok(ValidationSpec::default())
        }
    }

    let config_path = setup.command.config_path.clone().unwrap();
    std::fs::write(
        &config_path,
        r#"{"git_strategy": "in_place", "pytest": {"enabled": false}}"#,
    )
    .unwrap();

    let outcome = setup
        .command
        .run_with(
            CancellationToken::new(),
            vec![Arc::new(NamedStub)],
            Arc::new(LocalAgent::new()),
        )
        .await
        .expect("run succeeds because the failing plugin never runs");
    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(outcome.summary.findings, 0);
}
