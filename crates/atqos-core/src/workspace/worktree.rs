use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Workspace, WorkspaceError, WorkspaceStrategy};

/// Per-task git worktrees under a strategy-owned root.
///
/// Each task gets branch `atqos/task-<id>` checked out at
/// `<root>/task-<id>`. Finalize unregisters the worktree and removes the
/// directory; the branch is left behind so completed work stays
/// reachable.
#[derive(Debug, Clone)]
pub struct WorktreeStrategy {
    root: PathBuf,
}

impl WorktreeStrategy {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Conventional branch name for a task.
    pub fn branch_name(task_id: i64) -> String {
        format!("atqos/task-{task_id}")
    }
}

#[async_trait]
impl WorkspaceStrategy for WorktreeStrategy {
    fn name(&self) -> &str {
        "worktree"
    }

    async fn prepare(&self, repo_path: &Path, task_id: i64) -> Result<Workspace, WorkspaceError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| WorkspaceError::Io {
                path: self.root.clone(),
                source: e,
            })?;

        let branch = Self::branch_name(task_id);
        let path = self.root.join(format!("task-{task_id}"));

        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(repo_path)
            .args(["worktree", "add", "-b", &branch])
            .arg(&path)
            .output()
            .await
            .map_err(|e| WorkspaceError::GitCommand {
                message: "failed to run git worktree add".into(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(WorkspaceError::GitExit {
                command: "worktree add".into(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(Workspace {
            path,
            branch: Some(branch),
            is_worktree: true,
        })
    }

    async fn finalize(&self, workspace: &Workspace) -> Result<(), WorkspaceError> {
        if !workspace.is_worktree {
            return Ok(());
        }

        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(&workspace.path)
            .args(["worktree", "remove", "--force"])
            .arg(&workspace.path)
            .output()
            .await
            .map_err(|e| WorkspaceError::GitCommand {
                message: "failed to run git worktree remove".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            // Already gone counts as removed.
            if stderr.contains("is not a working tree") {
                return Ok(());
            }
            return Err(WorkspaceError::GitExit {
                command: "worktree remove".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }
}
