//! Append-only run telemetry.
//!
//! One JSONL file per run. Writes are serialized by a mutex so records
//! from parallel workers stay well-formed lines. The log is a side
//! channel: losing it never affects correctness, and worker call sites
//! treat emit failures as warnings.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use atqos_store::models::format_instant;

/// Severity of an event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for EventLevel {
    type Err = EventLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(EventLevelParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`EventLevel`] string.
#[derive(Debug, Clone)]
pub struct EventLevelParseError(pub String);

impl fmt::Display for EventLevelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid event level: {:?}", self.0)
    }
}

impl std::error::Error for EventLevelParseError {}

/// One lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub run_id: String,
    pub level: EventLevel,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Event {
    pub fn new(run_id: &str, level: EventLevel, event_type: impl Into<String>) -> Self {
        Self {
            run_id: run_id.to_string(),
            level,
            event_type: event_type.into(),
            tool: None,
            task_id: None,
            attempt_id: None,
            payload: None,
        }
    }

    pub fn info(run_id: &str, event_type: impl Into<String>) -> Self {
        Self::new(run_id, EventLevel::Info, event_type)
    }

    pub fn error(run_id: &str, event_type: impl Into<String>) -> Self {
        Self::new(run_id, EventLevel::Error, event_type)
    }

    pub fn with_tool(mut self, tool: &str) -> Self {
        self.tool = Some(tool.to_string());
        self
    }

    pub fn with_task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_attempt(mut self, attempt_id: i64) -> Self {
        self.attempt_id = Some(attempt_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// On-disk shape of one line: the event with a write-time timestamp.
#[derive(Serialize)]
struct EventLine<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a Event,
}

/// Append-only event log for a single run.
pub struct EventLog {
    file: Mutex<File>,
}

impl EventLog {
    /// Open (or create) the log file in append mode, creating parent
    /// directories as needed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create event log directory {}", parent.display())
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open event log at {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Serialize one event as a JSON line, stamped with the current UTC
    /// instant.
    pub fn emit(&self, event: &Event) -> Result<()> {
        let line = EventLine {
            ts: format_instant(Utc::now()),
            event,
        };
        let mut data = serde_json::to_vec(&line).context("failed to serialize event")?;
        data.push(b'\n');

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(&data).context("failed to write event")?;
        Ok(())
    }
}
