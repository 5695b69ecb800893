use std::path::Path;

use async_trait::async_trait;

use super::{Workspace, WorkspaceError, WorkspaceStrategy};

/// No isolation: every task works directly in the repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct InPlaceStrategy;

impl InPlaceStrategy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkspaceStrategy for InPlaceStrategy {
    fn name(&self) -> &str {
        "in_place"
    }

    async fn prepare(&self, repo_path: &Path, _task_id: i64) -> Result<Workspace, WorkspaceError> {
        Ok(Workspace {
            path: repo_path.to_path_buf(),
            branch: None,
            is_worktree: false,
        })
    }

    async fn finalize(&self, _workspace: &Workspace) -> Result<(), WorkspaceError> {
        Ok(())
    }
}
