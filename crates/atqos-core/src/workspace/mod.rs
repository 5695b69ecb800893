//! Workspace strategies: where a task's agent gets to work.
//!
//! Two variants. In-place hands back the repository itself (no
//! isolation; safe only with a single worker or non-overlapping tasks).
//! The branched variant gives every task its own git worktree on a
//! task-named branch and tears it down afterwards.

mod in_place;
mod worktree;

pub use in_place::InPlaceStrategy;
pub use worktree::WorktreeStrategy;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Errors from workspace preparation or teardown.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// A git command could not be launched.
    #[error("git command failed: {message}")]
    GitCommand {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// A git command exited with a non-zero status.
    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Filesystem setup under the strategy root failed.
    #[error("workspace io error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An isolated (or deliberately shared) working directory for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub is_worktree: bool,
}

/// Strategy contract: produce a workspace for a task, release it after.
#[async_trait]
pub trait WorkspaceStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn prepare(&self, repo_path: &Path, task_id: i64) -> Result<Workspace, WorkspaceError>;

    async fn finalize(&self, workspace: &Workspace) -> Result<(), WorkspaceError>;
}

// Compile-time assertion: the strategy must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn WorkspaceStrategy) {}
};
