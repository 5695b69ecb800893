//! Agent contract and concrete adapters.
//!
//! Agents are external code-modifying backends. The kernel hands each
//! one a structured request on stdin and expects exactly one structured
//! result on stdout. Results are advisory: the worker re-runs the task's
//! frozen validation spec and applies its own enforcement before any
//! success transition.

mod cli;
mod codex;
mod local;

pub use cli::CommandAgent;
pub use codex::CodexCliAgent;
pub use local::LocalAgent;

use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Wire schema version for requests and results.
pub const SCHEMA_VERSION: u32 = 1;

/// Outcome an agent claims for its invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Success,
    Failure,
    Blocked,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Validation commands echoed to the agent, verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationCommands {
    pub commands: Vec<String>,
}

/// The structured request written to the agent's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub schema_version: u32,
    pub run_id: String,
    pub task_id: i64,
    pub task_type: String,
    pub tool: String,
    pub repo_path: String,
    pub workspace_path: String,
    pub allowed_paths: Vec<String>,
    pub read_only_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<serde_json::Value>,
    pub instructions: String,
    pub validation: ValidationCommands,
}

/// Files the agent says it touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeManifest {
    pub files_changed: Vec<String>,
    pub files_created: Vec<String>,
    pub files_deleted: Vec<String>,
    pub insertions: u64,
    pub deletions: u64,
}

/// Commands and tests the agent says it ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentActions {
    pub commands: Vec<String>,
    pub tests: Vec<String>,
}

/// The agent's own validation account. Advisory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSelfReport {
    pub exit_code: i64,
    pub summary: Option<serde_json::Value>,
}

/// Side observations the agent wants to surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentNotes {
    pub systematic_issue: bool,
    pub followups: Vec<String>,
}

/// References to artifacts the agent produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentArtifacts {
    pub prompt: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub patch: Option<String>,
}

/// The single structured record an agent returns on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub schema_version: u32,
    pub run_id: String,
    pub task_id: i64,
    pub status: AgentStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub changes: ChangeManifest,
    #[serde(default)]
    pub actions: AgentActions,
    #[serde(default)]
    pub validation: ValidationSelfReport,
    #[serde(default)]
    pub notes: AgentNotes,
    #[serde(default)]
    pub artifacts: AgentArtifacts,
}

/// External code-modifying backend.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResult>;
}

// Compile-time assertion: the agent contract must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Agent) {}
};

/// Decode and check an agent's stdout against the request it answered.
/// Schema version must round-trip equal; run id and task id on the
/// result must match the request, else the result is rejected.
pub(crate) fn decode_result(request: &AgentRequest, stdout: &[u8]) -> Result<AgentResult> {
    let result: AgentResult =
        serde_json::from_slice(stdout).context("failed to decode agent result")?;
    if result.schema_version != request.schema_version {
        bail!(
            "agent result schema mismatch: got {}, expected {}",
            result.schema_version,
            request.schema_version
        );
    }
    if result.run_id != request.run_id || result.task_id != request.task_id {
        bail!("agent result does not match request");
    }
    Ok(result)
}

/// Pick the agent adapter from the recognized environment variables.
/// `ATQOS_CODEX_CMD` wins, then `ATQOS_AGENT_CMD`; absent both, the
/// built-in no-op local agent is used.
pub fn agent_from_env() -> Arc<dyn Agent> {
    select_agent(
        std::env::var("ATQOS_CODEX_CMD").ok().as_deref(),
        std::env::var("ATQOS_AGENT_CMD").ok().as_deref(),
    )
}

fn select_agent(codex_cmd: Option<&str>, agent_cmd: Option<&str>) -> Arc<dyn Agent> {
    if let Some(argv) = split_command(codex_cmd) {
        return Arc::new(CodexCliAgent::new(argv));
    }
    if let Some(argv) = split_command(agent_cmd) {
        return Arc::new(CommandAgent::new("cli", argv));
    }
    Arc::new(LocalAgent::new())
}

fn split_command(raw: Option<&str>) -> Option<Vec<String>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match shell_words::split(raw) {
        Ok(argv) if !argv.is_empty() => Some(argv),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, command = raw, "unparseable agent command, ignoring");
            None
        }
    }
}

#[cfg(test)]
pub(crate) fn test_request(run_id: &str, task_id: i64) -> AgentRequest {
    AgentRequest {
        schema_version: SCHEMA_VERSION,
        run_id: run_id.to_string(),
        task_id,
        task_type: "fix".to_string(),
        tool: "pytest".to_string(),
        repo_path: "/tmp/repo".to_string(),
        workspace_path: "/tmp/repo".to_string(),
        allowed_paths: vec!["src".to_string(), "tests".to_string()],
        read_only_paths: vec![".git".to_string()],
        targets: None,
        instructions: "Fix the failing tests.".to_string(),
        validation: ValidationCommands {
            commands: vec!["python -m pytest -q".to_string()],
        },
    }
}
