use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{Agent, AgentRequest, AgentResult, AgentStatus};

/// Built-in no-op agent, used when no external adapter is configured.
/// Makes no changes; validation alone decides each attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalAgent;

impl LocalAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for LocalAgent {
    fn name(&self) -> &str {
        "local"
    }

    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResult> {
        if request.task_id == 0 {
            bail!("task id required");
        }
        Ok(AgentResult {
            schema_version: request.schema_version,
            run_id: request.run_id.clone(),
            task_id: request.task_id,
            status: AgentStatus::Success,
            summary: "no-op agent invocation".to_string(),
            changes: Default::default(),
            actions: Default::default(),
            validation: Default::default(),
            notes: Default::default(),
            artifacts: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_request;

    #[tokio::test]
    async fn returns_success_echoing_ids() {
        let agent = LocalAgent::new();
        let request = test_request("run-9", 3);
        let result = agent.invoke(&request).await.expect("invoke");
        assert_eq!(result.status, AgentStatus::Success);
        assert_eq!(result.run_id, "run-9");
        assert_eq!(result.task_id, 3);
        assert!(result.changes.files_changed.is_empty());
    }

    #[tokio::test]
    async fn rejects_zero_task_id() {
        let agent = LocalAgent::new();
        let request = test_request("run-9", 0);
        assert!(agent.invoke(&request).await.is_err());
    }
}
