//! Integration tests for the SQLite store: schema, batch inserts, the
//! atomic claim protocol, and attempt bookkeeping.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use atqos_store::models::{
    new_run_id, ArtifactRecord, AttemptRecord, AttemptStatus, FindingRecord, RunRecord, RunStatus,
    Severity, TaskRecord, TaskStatus, TaskType,
};
use atqos_store::SqliteStore;

fn open_store(dir: &TempDir) -> SqliteStore {
    let store = SqliteStore::open(dir.path().join("atqos.db")).expect("open store");
    store.init().expect("init schema");
    store
}

fn seed_run(store: &SqliteStore) -> String {
    let run_id = new_run_id();
    store
        .create_run(&RunRecord {
            run_id: run_id.clone(),
            repo_path: "/tmp/repo".to_string(),
            started_at: Utc::now(),
            status: RunStatus::Running,
            config_json: "{}".to_string(),
        })
        .expect("create run");
    run_id
}

fn make_task(run_id: &str, priority: i64, fingerprint: &str) -> TaskRecord {
    let now = Utc::now();
    TaskRecord {
        id: 0,
        run_id: run_id.to_string(),
        tool: "pytest".to_string(),
        task_type: TaskType::Fix,
        priority,
        status: TaskStatus::Queued,
        fingerprint: fingerprint.to_string(),
        title: format!("task {fingerprint}"),
        description: "test task".to_string(),
        targets_json: "{\"files\":[]}".to_string(),
        validation_json: "{\"commands\":[],\"success_criteria\":{\"require_exit_code_0\":true}}"
            .to_string(),
        retry_policy_json: "{\"max_attempts\":2}".to_string(),
        depends_on_json: None,
        extra_json: None,
        claimed_by: None,
        claimed_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn make_finding(run_id: &str, fingerprint: &str) -> FindingRecord {
    FindingRecord {
        run_id: run_id.to_string(),
        tool: "pytest".to_string(),
        kind: "test_failure".to_string(),
        severity: Severity::High,
        fingerprint: fingerprint.to_string(),
        message: "assertion failed".to_string(),
        file_path: Some("tests/test_x.py".to_string()),
        line: None,
        col: None,
        symbol: None,
        test_id: Some("tests/test_x.py::test_a".to_string()),
        raw_ref: None,
        meta_json: None,
        created_at: Utc::now(),
    }
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.init().expect("second init should succeed");
    store.init().expect("third init should succeed");
}

#[test]
fn claim_on_empty_queue_returns_none() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let run_id = seed_run(&store);

    let claimed = store.claim_next_task(&run_id, "worker-1").expect("claim");
    assert!(claimed.is_none());

    // No mutation: the summary still reports zero tasks.
    let summary = store.get_run_summary(&run_id).expect("summary");
    assert_eq!(summary.tasks, 0);
}

#[test]
fn empty_batches_are_noops() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let run_id = seed_run(&store);

    store.insert_findings(&[]).expect("empty findings");
    store.insert_tasks(&[]).expect("empty tasks");

    let summary = store.get_run_summary(&run_id).expect("summary");
    assert_eq!(summary.findings, 0);
    assert_eq!(summary.tasks, 0);
}

#[test]
fn claim_orders_by_priority_then_created_at() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let run_id = seed_run(&store);

    let mut low = make_task(&run_id, 50, "fp-low");
    let mut old_high = make_task(&run_id, 100, "fp-old-high");
    let mut new_high = make_task(&run_id, 100, "fp-new-high");
    low.created_at = Utc::now() - Duration::seconds(30);
    old_high.created_at = Utc::now() - Duration::seconds(20);
    new_high.created_at = Utc::now() - Duration::seconds(10);
    store
        .insert_tasks(&[low, new_high, old_high])
        .expect("insert tasks");

    let first = store
        .claim_next_task(&run_id, "worker-1")
        .expect("claim")
        .expect("task available");
    assert_eq!(first.fingerprint, "fp-old-high");

    let second = store
        .claim_next_task(&run_id, "worker-1")
        .expect("claim")
        .expect("task available");
    assert_eq!(second.fingerprint, "fp-new-high");

    let third = store
        .claim_next_task(&run_id, "worker-1")
        .expect("claim")
        .expect("task available");
    assert_eq!(third.fingerprint, "fp-low");

    assert!(store.claim_next_task(&run_id, "worker-1").expect("claim").is_none());
}

#[test]
fn claim_sets_claimant_and_running_status() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let run_id = seed_run(&store);
    store
        .insert_tasks(&[make_task(&run_id, 100, "fp-1")])
        .expect("insert");

    let task = store
        .claim_next_task(&run_id, "worker-7")
        .expect("claim")
        .expect("task available");
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.claimed_by.as_deref(), Some("worker-7"));
    assert!(task.claimed_at.is_some());

    let persisted = store.get_task(task.id).expect("get").expect("exists");
    assert_eq!(persisted.status, TaskStatus::Running);
    assert_eq!(persisted.claimed_by.as_deref(), Some("worker-7"));
}

#[test]
fn concurrent_claims_are_exclusive() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir));
    let run_id = seed_run(&store);

    let tasks: Vec<TaskRecord> = (0..100)
        .map(|i| make_task(&run_id, 100, &format!("fp-{i}")))
        .collect();
    store.insert_tasks(&tasks).expect("insert tasks");

    let mut handles = Vec::new();
    for worker in 0..8 {
        let store = Arc::clone(&store);
        let run_id = run_id.clone();
        handles.push(std::thread::spawn(move || {
            let worker_id = format!("worker-{worker}");
            let mut claimed = Vec::new();
            while let Some(task) = store
                .claim_next_task(&run_id, &worker_id)
                .expect("claim should not error")
            {
                claimed.push(task.id);
            }
            claimed
        }));
    }

    let mut all_claimed: Vec<i64> = Vec::new();
    for handle in handles {
        all_claimed.extend(handle.join().expect("worker thread panicked"));
    }

    all_claimed.sort_unstable();
    let before_dedup = all_claimed.len();
    all_claimed.dedup();
    assert_eq!(before_dedup, 100, "every task claimed exactly once");
    assert_eq!(all_claimed.len(), 100, "no task claimed twice");

    for task in store.list_tasks(&run_id).expect("list") {
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.claimed_by.is_some(), "running task must name a claimant");
    }
}

#[test]
fn attempt_numbers_are_contiguous() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let run_id = seed_run(&store);
    store
        .insert_tasks(&[make_task(&run_id, 100, "fp-1")])
        .expect("insert");
    let task = store
        .claim_next_task(&run_id, "worker-1")
        .expect("claim")
        .expect("task");

    for expected_no in 1..=3i64 {
        let next_no = store.count_attempts(task.id).expect("count") + 1;
        assert_eq!(next_no, expected_no);
        let attempt_id = store
            .create_attempt(&AttemptRecord {
                id: 0,
                task_id: task.id,
                attempt_no: next_no,
                status: AttemptStatus::Running,
                agent_name: Some("local".to_string()),
                agent_exit_code: None,
                validation_exit_code: None,
                started_at: Utc::now(),
                finished_at: None,
                summary_json: None,
                diff_stats_json: None,
                artifacts_json: None,
            })
            .expect("create attempt");
        store
            .finish_attempt(attempt_id, AttemptStatus::Failed, "{}", 1)
            .expect("finish attempt");
    }

    let attempts = store.list_attempts(task.id).expect("list attempts");
    let numbers: Vec<i64> = attempts.iter().map(|a| a.attempt_no).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(attempts.iter().all(|a| a.finished_at.is_some()));
}

#[test]
fn finish_attempt_records_validation_exit() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let run_id = seed_run(&store);
    store
        .insert_tasks(&[make_task(&run_id, 100, "fp-1")])
        .expect("insert");
    let task = store
        .claim_next_task(&run_id, "worker-1")
        .expect("claim")
        .expect("task");

    let attempt_id = store
        .create_attempt(&AttemptRecord {
            id: 0,
            task_id: task.id,
            attempt_no: 1,
            status: AttemptStatus::Running,
            agent_name: Some("local".to_string()),
            agent_exit_code: None,
            validation_exit_code: None,
            started_at: Utc::now(),
            finished_at: None,
            summary_json: None,
            diff_stats_json: None,
            artifacts_json: None,
        })
        .expect("create");
    store
        .finish_attempt(attempt_id, AttemptStatus::Succeeded, "{\"ok\":true}", 0)
        .expect("finish");

    let attempts = store.list_attempts(task.id).expect("list");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Succeeded);
    assert_eq!(attempts[0].validation_exit_code, Some(0));
    assert_eq!(attempts[0].summary_json.as_deref(), Some("{\"ok\":true}"));
}

#[test]
fn run_summary_counts_findings_and_tasks() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let run_id = seed_run(&store);

    store
        .insert_findings(&[make_finding(&run_id, "f-1"), make_finding(&run_id, "f-2")])
        .expect("insert findings");
    store
        .insert_tasks(&[make_task(&run_id, 100, "fp-1")])
        .expect("insert tasks");

    let summary = store.get_run_summary(&run_id).expect("summary");
    assert_eq!(summary.status, RunStatus::Running);
    assert_eq!(summary.findings, 2);
    assert_eq!(summary.tasks, 1);
    assert!(summary.finished.is_none());

    store
        .update_run_status(&run_id, RunStatus::Succeeded, "{}")
        .expect("update status");
    let summary = store.get_run_summary(&run_id).expect("summary");
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert!(summary.finished.is_some());
}

#[test]
fn duplicate_fingerprints_are_preserved() {
    // Checkpoint passes re-insert findings with identical fingerprints;
    // dedup is a reader concern.
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let run_id = seed_run(&store);

    store
        .insert_findings(&[make_finding(&run_id, "same"), make_finding(&run_id, "same")])
        .expect("insert");

    let findings = store.list_findings(&run_id).expect("list");
    assert_eq!(findings.len(), 2);
    assert_eq!(findings[0].fingerprint, findings[1].fingerprint);
}

#[test]
fn link_task_findings_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let run_id = seed_run(&store);
    store
        .insert_findings(&[make_finding(&run_id, "f-1")])
        .expect("insert finding");
    store
        .insert_tasks(&[make_task(&run_id, 100, "fp-1")])
        .expect("insert task");
    let task = store.list_tasks(&run_id).expect("list")[0].clone();
    let finding_id = 1;

    store
        .link_task_findings(task.id, &[finding_id])
        .expect("first link");
    store
        .link_task_findings(task.id, &[finding_id])
        .expect("second link should not fail");
    store.link_task_findings(task.id, &[]).expect("empty link");
}

#[test]
fn add_artifact_and_list() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let run_id = seed_run(&store);

    store
        .add_artifact(&ArtifactRecord {
            run_id: run_id.clone(),
            tool: Some("pytest".to_string()),
            kind: "report".to_string(),
            path: "/tmp/report.json".to_string(),
            sha256: Some("ab".repeat(32)),
            size_bytes: 42,
            created_at: Utc::now(),
            meta_json: None,
        })
        .expect("add tool artifact");
    store
        .add_artifact(&ArtifactRecord {
            run_id: run_id.clone(),
            tool: None,
            kind: "summary".to_string(),
            path: "/tmp/summary.json".to_string(),
            sha256: None,
            size_bytes: 7,
            created_at: Utc::now(),
            meta_json: None,
        })
        .expect("add core artifact");

    let artifacts = store.list_artifacts(&run_id).expect("list");
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[0].kind, "report");
    assert_eq!(artifacts[0].tool.as_deref(), Some("pytest"));
    assert_eq!(artifacts[1].kind, "summary");
    assert!(artifacts[1].tool.is_none());
}
