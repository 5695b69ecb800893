//! Single-file embedded store for runs, artifacts, findings, tasks, and
//! attempts.
//!
//! The database runs in WAL mode with foreign keys on. All access goes
//! through one connection behind a mutex; that mutex is the writer latch
//! the claim protocol relies on. SQLite has no row-level locking, so
//! [`SqliteStore::claim_next_task`] takes an immediate (write-mode)
//! transaction: concurrent workers serialize on the latch and a task
//! leaves `queued` exactly once.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::models::{
    format_instant, parse_instant, ArtifactRecord, AttemptRecord, AttemptStatus, FindingRecord,
    RunRecord, RunStatus, RunSummary, TaskRecord, TaskStatus,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL UNIQUE,
    repo_path TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL,
    config_json TEXT NOT NULL,
    summary_json TEXT
);
CREATE TABLE IF NOT EXISTS artifacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    tool TEXT,
    kind TEXT NOT NULL,
    path TEXT NOT NULL,
    sha256 TEXT,
    size_bytes INTEGER,
    created_at TEXT NOT NULL,
    meta_json TEXT,
    FOREIGN KEY(run_id) REFERENCES runs(run_id)
);
CREATE INDEX IF NOT EXISTS idx_artifacts_run_id ON artifacts(run_id);
CREATE TABLE IF NOT EXISTS findings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    tool TEXT NOT NULL,
    kind TEXT NOT NULL,
    severity TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    message TEXT NOT NULL,
    file_path TEXT,
    line INTEGER,
    col INTEGER,
    symbol TEXT,
    test_id TEXT,
    raw_ref TEXT,
    meta_json TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY(run_id) REFERENCES runs(run_id)
);
CREATE INDEX IF NOT EXISTS idx_findings_run_tool ON findings(run_id, tool);
CREATE INDEX IF NOT EXISTS idx_findings_fingerprint ON findings(fingerprint);
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    tool TEXT NOT NULL,
    task_type TEXT NOT NULL,
    priority INTEGER NOT NULL,
    status TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    targets_json TEXT NOT NULL,
    validation_json TEXT NOT NULL,
    retry_policy_json TEXT NOT NULL,
    depends_on_json TEXT,
    extra_json TEXT,
    claimed_by TEXT,
    claimed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY(run_id) REFERENCES runs(run_id)
);
CREATE INDEX IF NOT EXISTS idx_tasks_run_status ON tasks(run_id, status);
CREATE INDEX IF NOT EXISTS idx_tasks_fingerprint ON tasks(fingerprint);
CREATE TABLE IF NOT EXISTS attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL,
    attempt_no INTEGER NOT NULL,
    status TEXT NOT NULL,
    agent_name TEXT,
    agent_exit_code INTEGER,
    validation_exit_code INTEGER,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    summary_json TEXT,
    diff_stats_json TEXT,
    artifacts_json TEXT,
    FOREIGN KEY(task_id) REFERENCES tasks(id)
);
CREATE INDEX IF NOT EXISTS idx_attempts_task_id ON attempts(task_id);
CREATE TABLE IF NOT EXISTS task_findings (
    task_id INTEGER NOT NULL,
    finding_id INTEGER NOT NULL,
    PRIMARY KEY(task_id, finding_id),
    FOREIGN KEY(task_id) REFERENCES tasks(id),
    FOREIGN KEY(finding_id) REFERENCES findings(id)
);
";

/// Durable store backed by a single SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file, enabling WAL mode and foreign
    /// keys. Parent directories are created as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("failed to set foreign_keys=ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Idempotent schema creation.
    pub fn init(&self) -> Result<()> {
        self.lock()
            .execute_batch(SCHEMA)
            .context("failed to create schema")
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    pub fn create_run(&self, run: &RunRecord) -> Result<()> {
        self.lock()
            .execute(
                "INSERT INTO runs (run_id, repo_path, started_at, status, config_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run.run_id,
                    run.repo_path,
                    format_instant(run.started_at),
                    run.status.to_string(),
                    run.config_json,
                ],
            )
            .context("failed to insert run")?;
        Ok(())
    }

    /// Transition a run to a (usually terminal) status, stamping
    /// `finished_at` with the current instant.
    pub fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        summary_json: &str,
    ) -> Result<()> {
        let n = self
            .lock()
            .execute(
                "UPDATE runs SET status = ?1, summary_json = ?2, finished_at = ?3 \
                 WHERE run_id = ?4",
                params![
                    status.to_string(),
                    summary_json,
                    format_instant(Utc::now()),
                    run_id,
                ],
            )
            .context("failed to update run status")?;
        if n == 0 {
            anyhow::bail!("run {run_id} not found");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Artifacts
    // -----------------------------------------------------------------------

    pub fn add_artifact(&self, artifact: &ArtifactRecord) -> Result<()> {
        self.lock()
            .execute(
                "INSERT INTO artifacts (run_id, tool, kind, path, sha256, size_bytes, created_at, meta_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    artifact.run_id,
                    artifact.tool,
                    artifact.kind,
                    artifact.path,
                    artifact.sha256,
                    artifact.size_bytes,
                    format_instant(artifact.created_at),
                    artifact.meta_json,
                ],
            )
            .context("failed to insert artifact")?;
        Ok(())
    }

    pub fn list_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT run_id, tool, kind, path, sha256, size_bytes, created_at, meta_json \
                 FROM artifacts WHERE run_id = ?1 ORDER BY id ASC",
            )
            .context("failed to prepare artifact query")?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(ArtifactRecord {
                    run_id: row.get(0)?,
                    tool: row.get(1)?,
                    kind: row.get(2)?,
                    path: row.get(3)?,
                    sha256: row.get(4)?,
                    size_bytes: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                    created_at: instant_col(row, 6)?,
                    meta_json: row.get(7)?,
                })
            })
            .context("failed to query artifacts")?;
        collect_rows(rows)
    }

    // -----------------------------------------------------------------------
    // Findings
    // -----------------------------------------------------------------------

    /// Insert a batch of findings in one transaction with a prepared
    /// statement per row. An empty batch is a no-op and opens no
    /// transaction.
    pub fn insert_findings(&self, findings: &[FindingRecord]) -> Result<()> {
        if findings.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock();
        let tx = conn.transaction().context("failed to begin transaction")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO findings (run_id, tool, kind, severity, fingerprint, message, \
                     file_path, line, col, symbol, test_id, raw_ref, meta_json, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                )
                .context("failed to prepare finding insert")?;
            for finding in findings {
                stmt.execute(params![
                    finding.run_id,
                    finding.tool,
                    finding.kind,
                    finding.severity.to_string(),
                    finding.fingerprint,
                    finding.message,
                    finding.file_path,
                    finding.line,
                    finding.col,
                    finding.symbol,
                    finding.test_id,
                    finding.raw_ref,
                    finding.meta_json,
                    format_instant(finding.created_at),
                ])
                .context("failed to insert finding")?;
            }
        }
        tx.commit().context("failed to commit findings")
    }

    pub fn list_findings(&self, run_id: &str) -> Result<Vec<FindingRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT run_id, tool, kind, severity, fingerprint, message, file_path, line, \
                 col, symbol, test_id, raw_ref, meta_json, created_at \
                 FROM findings WHERE run_id = ?1 ORDER BY id ASC",
            )
            .context("failed to prepare finding query")?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(FindingRecord {
                    run_id: row.get(0)?,
                    tool: row.get(1)?,
                    kind: row.get(2)?,
                    severity: enum_col(row, 3)?,
                    fingerprint: row.get(4)?,
                    message: row.get(5)?,
                    file_path: row.get(6)?,
                    line: row.get(7)?,
                    col: row.get(8)?,
                    symbol: row.get(9)?,
                    test_id: row.get(10)?,
                    raw_ref: row.get(11)?,
                    meta_json: row.get(12)?,
                    created_at: instant_col(row, 13)?,
                })
            })
            .context("failed to query findings")?;
        collect_rows(rows)
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Insert a batch of tasks in one transaction. Ids and claim columns
    /// on the input records are ignored; the database assigns rowids.
    pub fn insert_tasks(&self, tasks: &[TaskRecord]) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock();
        let tx = conn.transaction().context("failed to begin transaction")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO tasks (run_id, tool, task_type, priority, status, fingerprint, \
                     title, description, targets_json, validation_json, retry_policy_json, \
                     depends_on_json, extra_json, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                )
                .context("failed to prepare task insert")?;
            for task in tasks {
                stmt.execute(params![
                    task.run_id,
                    task.tool,
                    task.task_type.to_string(),
                    task.priority,
                    task.status.to_string(),
                    task.fingerprint,
                    task.title,
                    task.description,
                    task.targets_json,
                    task.validation_json,
                    task.retry_policy_json,
                    task.depends_on_json,
                    task.extra_json,
                    format_instant(task.created_at),
                    format_instant(task.updated_at),
                ])
                .context("failed to insert task")?;
            }
        }
        tx.commit().context("failed to commit tasks")
    }

    /// Claim the single best queued task for a run, atomically marking it
    /// `running` for `worker_id`.
    ///
    /// The selection is priority DESC then created_at ASC. The whole
    /// operation runs inside a `BEGIN IMMEDIATE` transaction and the
    /// update is gated on `status = 'queued'`, so a task can only be
    /// claimed once. Returns `None` (with no mutation) when the queue is
    /// empty.
    pub fn claim_next_task(&self, run_id: &str, worker_id: &str) -> Result<Option<TaskRecord>> {
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin claim transaction")?;

        let task = tx
            .query_row(
                &format!("{TASK_SELECT} WHERE run_id = ?1 AND status = 'queued' \
                          ORDER BY priority DESC, created_at ASC LIMIT 1"),
                params![run_id],
                map_task_row,
            )
            .optional()
            .context("failed to select queued task")?;

        let Some(mut task) = task else {
            return Ok(None);
        };

        let now = Utc::now();
        let now_text = format_instant(now);
        let updated = tx
            .execute(
                "UPDATE tasks SET status = 'running', claimed_by = ?1, claimed_at = ?2, \
                 updated_at = ?2 WHERE id = ?3 AND status = 'queued'",
                params![worker_id, now_text, task.id],
            )
            .context("failed to claim task")?;
        tx.commit().context("failed to commit claim")?;

        if updated == 0 {
            // Another claimant won between select and update; under the
            // connection mutex this cannot happen, but a zero-row update
            // is still a clean miss rather than an error.
            return Ok(None);
        }

        task.status = TaskStatus::Running;
        task.claimed_by = Some(worker_id.to_string());
        task.claimed_at = parse_instant(&now_text).ok();
        task.updated_at = task.claimed_at.unwrap_or(now);
        Ok(Some(task))
    }

    pub fn update_task_status(
        &self,
        task_id: i64,
        status: TaskStatus,
        extra_json: Option<&str>,
    ) -> Result<()> {
        let n = self
            .lock()
            .execute(
                "UPDATE tasks SET status = ?1, extra_json = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    status.to_string(),
                    extra_json,
                    format_instant(Utc::now()),
                    task_id,
                ],
            )
            .context("failed to update task status")?;
        if n == 0 {
            anyhow::bail!("task {task_id} not found");
        }
        Ok(())
    }

    pub fn get_task(&self, task_id: i64) -> Result<Option<TaskRecord>> {
        self.lock()
            .query_row(
                &format!("{TASK_SELECT} WHERE id = ?1"),
                params![task_id],
                map_task_row,
            )
            .optional()
            .context("failed to fetch task")
    }

    pub fn list_tasks(&self, run_id: &str) -> Result<Vec<TaskRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "{TASK_SELECT} WHERE run_id = ?1 ORDER BY created_at ASC, id ASC"
            ))
            .context("failed to prepare task query")?;
        let rows = stmt
            .query_map(params![run_id], map_task_row)
            .context("failed to query tasks")?;
        collect_rows(rows)
    }

    /// Associate findings with a task. Idempotent: existing links are
    /// left in place. The kernel does not call this in v1; it exists for
    /// post-run tooling reading the database file directly.
    pub fn link_task_findings(&self, task_id: i64, finding_ids: &[i64]) -> Result<()> {
        if finding_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock();
        let tx = conn.transaction().context("failed to begin transaction")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO task_findings (task_id, finding_id) VALUES (?1, ?2)",
                )
                .context("failed to prepare link insert")?;
            for finding_id in finding_ids {
                stmt.execute(params![task_id, finding_id])
                    .context("failed to link task to finding")?;
            }
        }
        tx.commit().context("failed to commit links")
    }

    // -----------------------------------------------------------------------
    // Attempts
    // -----------------------------------------------------------------------

    /// Insert an attempt record and return its id. `finished_at` on the
    /// input is ignored; attempts finish via [`Self::finish_attempt`].
    pub fn create_attempt(&self, attempt: &AttemptRecord) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO attempts (task_id, attempt_no, status, agent_name, agent_exit_code, \
             validation_exit_code, started_at, summary_json, diff_stats_json, artifacts_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                attempt.task_id,
                attempt.attempt_no,
                attempt.status.to_string(),
                attempt.agent_name,
                attempt.agent_exit_code,
                attempt.validation_exit_code,
                format_instant(attempt.started_at),
                attempt.summary_json,
                attempt.diff_stats_json,
                attempt.artifacts_json,
            ],
        )
        .context("failed to insert attempt")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish_attempt(
        &self,
        attempt_id: i64,
        status: AttemptStatus,
        summary_json: &str,
        validation_exit_code: i64,
    ) -> Result<()> {
        let n = self
            .lock()
            .execute(
                "UPDATE attempts SET status = ?1, summary_json = ?2, validation_exit_code = ?3, \
                 finished_at = ?4 WHERE id = ?5",
                params![
                    status.to_string(),
                    summary_json,
                    validation_exit_code,
                    format_instant(Utc::now()),
                    attempt_id,
                ],
            )
            .context("failed to finish attempt")?;
        if n == 0 {
            anyhow::bail!("attempt {attempt_id} not found");
        }
        Ok(())
    }

    /// Record agent outcome and diff stats on an in-flight attempt.
    pub fn record_attempt_agent(
        &self,
        attempt_id: i64,
        agent_exit_code: Option<i64>,
        diff_stats_json: Option<&str>,
        artifacts_json: Option<&str>,
    ) -> Result<()> {
        self.lock()
            .execute(
                "UPDATE attempts SET agent_exit_code = ?1, diff_stats_json = ?2, \
                 artifacts_json = ?3 WHERE id = ?4",
                params![agent_exit_code, diff_stats_json, artifacts_json, attempt_id],
            )
            .context("failed to record agent outcome")?;
        Ok(())
    }

    pub fn list_attempts(&self, task_id: i64) -> Result<Vec<AttemptRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, attempt_no, status, agent_name, agent_exit_code, \
                 validation_exit_code, started_at, finished_at, summary_json, \
                 diff_stats_json, artifacts_json \
                 FROM attempts WHERE task_id = ?1 ORDER BY attempt_no ASC",
            )
            .context("failed to prepare attempt query")?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok(AttemptRecord {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    attempt_no: row.get(2)?,
                    status: enum_col(row, 3)?,
                    agent_name: row.get(4)?,
                    agent_exit_code: row.get(5)?,
                    validation_exit_code: row.get(6)?,
                    started_at: instant_col(row, 7)?,
                    finished_at: opt_instant_col(row, 8)?,
                    summary_json: row.get(9)?,
                    diff_stats_json: row.get(10)?,
                    artifacts_json: row.get(11)?,
                })
            })
            .context("failed to query attempts")?;
        collect_rows(rows)
    }

    pub fn count_attempts(&self, task_id: i64) -> Result<i64> {
        self.lock()
            .query_row(
                "SELECT COUNT(*) FROM attempts WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .context("failed to count attempts")
    }

    // -----------------------------------------------------------------------
    // Summary
    // -----------------------------------------------------------------------

    pub fn get_run_summary(&self, run_id: &str) -> Result<RunSummary> {
        let conn = self.lock();
        let (status_text, started_text, finished_text): (String, String, Option<String>) = conn
            .query_row(
                "SELECT status, started_at, finished_at FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .with_context(|| format!("run {run_id} not found"))?;

        let findings: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM findings WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .context("failed to count findings")?;
        let tasks: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .context("failed to count tasks")?;

        let status: RunStatus = status_text
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("corrupt run status")?;
        let started = parse_instant(&started_text).context("corrupt started_at")?;
        let finished = match finished_text {
            Some(text) => Some(parse_instant(&text).context("corrupt finished_at")?),
            None => None,
        };

        Ok(RunSummary {
            run_id: run_id.to_string(),
            status,
            findings,
            tasks,
            started,
            finished,
        })
    }
}

const TASK_SELECT: &str = "SELECT id, run_id, tool, task_type, priority, status, fingerprint, \
     title, description, targets_json, validation_json, retry_policy_json, depends_on_json, \
     extra_json, claimed_by, claimed_at, created_at, updated_at FROM tasks";

fn map_task_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        run_id: row.get(1)?,
        tool: row.get(2)?,
        task_type: enum_col(row, 3)?,
        priority: row.get(4)?,
        status: enum_col(row, 5)?,
        fingerprint: row.get(6)?,
        title: row.get(7)?,
        description: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        targets_json: row.get(9)?,
        validation_json: row.get(10)?,
        retry_policy_json: row.get(11)?,
        depends_on_json: row.get(12)?,
        extra_json: row.get(13)?,
        claimed_by: row.get(14)?,
        claimed_at: opt_instant_col(row, 15)?,
        created_at: instant_col(row, 16)?,
        updated_at: instant_col(row, 17)?,
    })
}

/// Read a textual enum column, mapping parse failures into rusqlite's
/// conversion error so they surface through the normal row pipeline.
fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e: T::Err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn instant_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_instant(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn opt_instant_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    match text {
        Some(text) => instant_from_text(&text, idx).map(Some),
        None => Ok(None),
    }
}

fn instant_from_text(text: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_instant(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("failed to decode row")?);
    }
    Ok(out)
}
