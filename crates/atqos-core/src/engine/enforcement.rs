//! Kernel-side enforcement of agent write boundaries.
//!
//! The agent's change manifest is advisory; what counts is the actual
//! state of the workspace after the invocation. Diff stats come from the
//! workspace's own git checkout. A workspace that is not a git checkout
//! yields no stats, and enforcement is skipped with a warning.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// What actually changed in a workspace, as git sees it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffStats {
    pub files: Vec<String>,
    pub insertions: u64,
    pub deletions: u64,
}

/// Limits a diff is checked against.
#[derive(Debug, Clone)]
pub struct EnforcementLimits<'a> {
    pub allowed_paths: &'a [String],
    pub read_only_paths: &'a [String],
    pub max_files_changed: usize,
    pub max_lines_changed: u64,
}

/// Collect diff stats for a workspace: tracked changes against HEAD plus
/// untracked files. Returns `None` when the directory is not a git
/// checkout.
pub async fn collect_diff_stats(workspace: &Path) -> Option<DiffStats> {
    let numstat = git_output(workspace, &["diff", "--numstat", "HEAD"]).await?;
    let mut stats = DiffStats::default();
    for line in numstat.lines() {
        let mut parts = line.split('\t');
        let (Some(insertions), Some(deletions), Some(path)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let path = path.trim();
        if path.is_empty() {
            continue;
        }
        // Binary files report "-" for both counts.
        stats.insertions += insertions.trim().parse::<u64>().unwrap_or(0);
        stats.deletions += deletions.trim().parse::<u64>().unwrap_or(0);
        stats.files.push(path.to_string());
    }

    let porcelain = git_output(workspace, &["status", "--porcelain"]).await?;
    for line in porcelain.lines() {
        if let Some(path) = line.strip_prefix("?? ") {
            stats.files.push(path.trim().to_string());
        }
    }

    stats.files.sort();
    stats.files.dedup();
    Some(stats)
}

async fn git_output(workspace: &Path, args: &[&str]) -> Option<String> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(workspace)
        .args(args)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check a diff against the limits. Returns the list of violations;
/// empty means the attempt passes enforcement.
pub fn check_diff(stats: &DiffStats, limits: &EnforcementLimits<'_>) -> Vec<String> {
    let mut violations = Vec::new();

    for file in &stats.files {
        if limits
            .read_only_paths
            .iter()
            .any(|prefix| path_within(file, prefix))
        {
            violations.push(format!("touched read-only path: {file}"));
            continue;
        }
        if !limits
            .allowed_paths
            .iter()
            .any(|prefix| path_within(file, prefix))
        {
            violations.push(format!("change outside allowed paths: {file}"));
        }
    }

    if stats.files.len() > limits.max_files_changed {
        violations.push(format!(
            "too many files changed: {} > {}",
            stats.files.len(),
            limits.max_files_changed
        ));
    }
    let total_lines = stats.insertions + stats.deletions;
    if total_lines > limits.max_lines_changed {
        violations.push(format!(
            "too many lines changed: {} > {}",
            total_lines, limits.max_lines_changed
        ));
    }

    violations
}

/// Component-wise prefix check: `src/a.py` is within `src` but
/// `srcery/a.py` is not.
fn path_within(path: &str, prefix: &str) -> bool {
    Path::new(path).starts_with(prefix)
}
