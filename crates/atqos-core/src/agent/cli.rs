use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{decode_result, Agent, AgentRequest, AgentResult};

/// Generic CLI agent: any command that speaks the stdin/stdout wire
/// format can be wired in through `ATQOS_AGENT_CMD`.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    name: String,
    command: Vec<String>,
}

impl CommandAgent {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }
}

#[async_trait]
impl Agent for CommandAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResult> {
        if self.command.is_empty() {
            bail!("agent command not configured");
        }
        invoke_command(&self.command, request).await
    }
}

/// Spawn an agent subprocess, write the request to stdin, and decode the
/// single result record from stdout.
pub(super) async fn invoke_command(
    command: &[String],
    request: &AgentRequest,
) -> Result<AgentResult> {
    let payload = serde_json::to_vec(request).context("failed to encode agent request")?;

    let mut child = tokio::process::Command::new(&command[0])
        .args(&command[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn agent command {command:?}"))?;

    {
        let mut stdin = child.stdin.take().context("agent stdin unavailable")?;
        stdin
            .write_all(&payload)
            .await
            .context("failed to write agent request")?;
        // Close stdin so the agent sees EOF and starts processing.
    }

    let output = child
        .wait_with_output()
        .await
        .context("failed to wait on agent command")?;

    if !output.status.success() {
        bail!(
            "agent command failed (exit {}): {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    decode_result(request, &output.stdout)
}
