use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

impl FromStr for RunStatus {
    type Err = RunStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "aborted" => Ok(Self::Aborted),
            other => Err(RunStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`RunStatus`] string.
#[derive(Debug, Clone)]
pub struct RunStatusParseError(pub String);

impl fmt::Display for RunStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid run status: {:?}", self.0)
    }
}

impl std::error::Error for RunStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a task. Tasks move `queued -> running -> {succeeded, blocked,
/// abandoned}` with no back-transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Blocked,
    Abandoned,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Blocked => "blocked",
            Self::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "blocked" => Ok(Self::Blocked),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Kind of remediation a task asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Fix,
    AddTest,
    RemoveSkip,
    Refactor,
    Quarantine,
    Suppress,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fix => "fix",
            Self::AddTest => "add_test",
            Self::RemoveSkip => "remove_skip",
            Self::Refactor => "refactor",
            Self::Quarantine => "quarantine",
            Self::Suppress => "suppress",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskType {
    type Err = TaskTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fix" => Ok(Self::Fix),
            "add_test" => Ok(Self::AddTest),
            "remove_skip" => Ok(Self::RemoveSkip),
            "refactor" => Ok(Self::Refactor),
            "quarantine" => Ok(Self::Quarantine),
            "suppress" => Ok(Self::Suppress),
            other => Err(TaskTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskType`] string.
#[derive(Debug, Clone)]
pub struct TaskTypeParseError(pub String);

impl fmt::Display for TaskTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task type: {:?}", self.0)
    }
}

impl std::error::Error for TaskTypeParseError {}

// ---------------------------------------------------------------------------

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocker,
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Blocker => "blocker",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = SeverityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocker" => Ok(Self::Blocker),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(SeverityParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Severity`] string.
#[derive(Debug, Clone)]
pub struct SeverityParseError(pub String);

impl fmt::Display for SeverityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid severity: {:?}", self.0)
    }
}

impl std::error::Error for SeverityParseError {}

// ---------------------------------------------------------------------------

/// Status of a single task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for AttemptStatus {
    type Err = AttemptStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(AttemptStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`AttemptStatus`] string.
#[derive(Debug, Clone)]
pub struct AttemptStatusParseError(pub String);

impl fmt::Display for AttemptStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid attempt status: {:?}", self.0)
    }
}

impl std::error::Error for AttemptStatusParseError {}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Render an instant as RFC-3339 UTC at second precision, the canonical
/// textual form stored in the database and the event log.
pub fn format_instant(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an instant previously rendered by [`format_instant`].
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Record structs
// ---------------------------------------------------------------------------

/// A run -- a single orchestration pass against one repository snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub repo_path: String,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub config_json: String,
}

/// An on-disk file produced during a run. Immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub run_id: String,
    /// Producing tool; `None` for artifacts written by the kernel itself.
    pub tool: Option<String>,
    pub kind: String,
    pub path: String,
    pub sha256: Option<String>,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub meta_json: Option<String>,
}

/// A normalized diagnostic, identified across checkpoints by its
/// content fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingRecord {
    pub run_id: String,
    pub tool: String,
    pub kind: String,
    pub severity: Severity,
    pub fingerprint: String,
    pub message: String,
    pub file_path: Option<String>,
    pub line: Option<i64>,
    pub col: Option<i64>,
    pub symbol: Option<String>,
    pub test_id: Option<String>,
    pub raw_ref: Option<String>,
    pub meta_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A remediation work item derived from one or more findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub run_id: String,
    pub tool: String,
    pub task_type: TaskType,
    pub priority: i64,
    pub status: TaskStatus,
    pub fingerprint: String,
    pub title: String,
    pub description: String,
    pub targets_json: String,
    pub validation_json: String,
    pub retry_policy_json: String,
    pub depends_on_json: Option<String>,
    pub extra_json: Option<String>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One execution of a task by the worker pool. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: i64,
    pub task_id: i64,
    pub attempt_no: i64,
    pub status: AttemptStatus,
    pub agent_name: Option<String>,
    pub agent_exit_code: Option<i64>,
    pub validation_exit_code: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary_json: Option<String>,
    pub diff_stats_json: Option<String>,
    pub artifacts_json: Option<String>,
}

/// Aggregate view of a finished (or in-flight) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub findings: i64,
    pub tasks: i64,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
}

/// Generate an opaque, globally unique run id of the form `run-<16 hex>`.
pub fn new_run_id() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 8];
    rand::rng().fill(&mut bytes);
    format!("run-{}", hex::encode(bytes))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
