use anyhow::{bail, Result};
use async_trait::async_trait;

use super::cli::invoke_command;
use super::{Agent, AgentRequest, AgentResult};

/// Codex-style CLI adapter. Selected through `ATQOS_CODEX_CMD`; when
/// constructed without a command it falls back to whatever that variable
/// holds at invocation time, defaulting to plain `codex`.
#[derive(Debug, Clone, Default)]
pub struct CodexCliAgent {
    command: Vec<String>,
}

impl CodexCliAgent {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Agent for CodexCliAgent {
    fn name(&self) -> &str {
        "codex"
    }

    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResult> {
        let command = if self.command.is_empty() {
            default_codex_command()
        } else {
            self.command.clone()
        };
        if command.is_empty() {
            bail!("codex command not configured");
        }
        invoke_command(&command, request).await
    }
}

fn default_codex_command() -> Vec<String> {
    match std::env::var("ATQOS_CODEX_CMD") {
        Ok(raw) if !raw.trim().is_empty() => {
            shell_words::split(&raw).unwrap_or_else(|_| vec!["codex".to_string()])
        }
        _ => vec!["codex".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_request;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn configured_command_is_used() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("codex.sh");
        std::fs::write(
            &path,
            "#!/bin/sh\ncat > /dev/null\nprintf '%s' '{\"schema_version\":1,\"run_id\":\"run-1\",\"task_id\":1,\"status\":\"success\"}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let agent = CodexCliAgent::new(vec![path.to_string_lossy().into_owned()]);
        assert_eq!(agent.name(), "codex");
        let result = agent.invoke(&test_request("run-1", 1)).await.expect("invoke");
        assert_eq!(result.run_id, "run-1");
    }
}
