//! External process execution with captured output.
//!
//! Every interaction with the target repository crosses this boundary:
//! tool collection, validation commands, nothing is linked in-process.
//! Captured stdout/stderr land in artifact files so findings can point
//! back at raw output.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;

/// Exit code surfaced when a command exceeds its timeout and is killed.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// One command to execute. `args[0]` is the program.
#[derive(Debug, Clone, Default)]
pub struct Command {
    pub args: Vec<String>,
    /// Overlay merged over the orchestrator's own environment.
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub timeout_seconds: Option<u64>,
    /// When set, a non-zero exit is a result, not an error.
    pub allow_nonzero: bool,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub combined_path: Option<PathBuf>,
}

/// Outcome of one executed command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub combined_path: Option<PathBuf>,
    pub duration_ms: i64,
}

/// Executes commands on behalf of plugins and the validation loop.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, cmd: Command) -> Result<ExecResult>;
}

/// Default runner: spawns the process directly, captures both streams to
/// files, enforces the timeout by killing the child.
pub struct GenericRunner {
    artifact_root: PathBuf,
}

impl GenericRunner {
    pub fn new(artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            artifact_root: artifact_root.into(),
        }
    }
}

#[async_trait]
impl Runner for GenericRunner {
    async fn run(&self, cmd: Command) -> Result<ExecResult> {
        if cmd.args.is_empty() {
            bail!("command args required");
        }

        let started_at = Utc::now();
        let start = std::time::Instant::now();

        let mut child = tokio::process::Command::new(&cmd.args[0])
            .args(&cmd.args[1..])
            .envs(&cmd.env)
            .current_dir(cmd.cwd.as_deref().unwrap_or_else(|| Path::new(".")))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn command {:?}", cmd.args))?;

        // Take the pipes so they can be drained concurrently with waiting;
        // a full pipe buffer would otherwise deadlock the child.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let read_stdout = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                pipe.read_to_end(&mut buf).await.ok();
            }
            buf
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr_pipe {
                pipe.read_to_end(&mut buf).await.ok();
            }
            buf
        };

        let wait_all = async {
            let (status, stdout, stderr) = tokio::join!(child.wait(), read_stdout, read_stderr);
            (status, stdout, stderr)
        };

        let (exit_code, stdout, stderr) = match cmd.timeout_seconds {
            Some(secs) if secs > 0 => {
                match tokio::time::timeout(Duration::from_secs(secs), wait_all).await {
                    Ok((status, stdout, stderr)) => {
                        let status = status.context("failed to wait on command")?;
                        (status.code().unwrap_or(1), stdout, stderr)
                    }
                    Err(_elapsed) => {
                        let _ = child.kill().await;
                        let stderr =
                            format!("command {:?} timed out after {secs}s\n", cmd.args).into_bytes();
                        (TIMEOUT_EXIT_CODE, Vec::new(), stderr)
                    }
                }
            }
            _ => {
                let (status, stdout, stderr) = wait_all.await;
                let status = status.context("failed to wait on command")?;
                (status.code().unwrap_or(1), stdout, stderr)
            }
        };

        let stdout_path = cmd
            .stdout_path
            .unwrap_or_else(|| self.artifact_root.join("stdout.log"));
        let stderr_path = cmd
            .stderr_path
            .unwrap_or_else(|| self.artifact_root.join("stderr.log"));
        write_capture(&stdout_path, &stdout).await?;
        write_capture(&stderr_path, &stderr).await?;
        if let Some(ref combined_path) = cmd.combined_path {
            let mut combined = stdout.clone();
            combined.extend_from_slice(&stderr);
            write_capture(combined_path, &combined).await?;
        }

        if exit_code != 0 && !cmd.allow_nonzero {
            bail!("command {:?} failed with exit code {exit_code}", cmd.args);
        }

        let finished_at = Utc::now();
        Ok(ExecResult {
            exit_code,
            started_at,
            finished_at,
            stdout_path,
            stderr_path,
            combined_path: cmd.combined_path,
            duration_ms: i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX),
        })
    }
}

async fn write_capture(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create capture directory {}", parent.display()))?;
        }
    }
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("failed to write capture file {}", path.display()))
}

/// Named indirection over runners. Plugins address runners by logical
/// name ("python") without knowing how the invocation was resolved.
#[derive(Clone)]
pub struct RunnerRegistry {
    runners: HashMap<String, Arc<dyn Runner>>,
}

impl RunnerRegistry {
    /// Build the default registry: `generic` and `python` both map to a
    /// [`GenericRunner`] rooted at the artifact directory.
    pub fn new(artifact_root: impl Into<PathBuf>) -> Self {
        let generic: Arc<dyn Runner> = Arc::new(GenericRunner::new(artifact_root));
        let mut runners: HashMap<String, Arc<dyn Runner>> = HashMap::new();
        runners.insert("generic".to_string(), Arc::clone(&generic));
        runners.insert("python".to_string(), generic);
        Self { runners }
    }

    /// Register (or replace) a named runner.
    pub fn register(&mut self, name: impl Into<String>, runner: Arc<dyn Runner>) {
        self.runners.insert(name.into(), runner);
    }

    /// Look up a runner by name; unknown names fall back to `generic`.
    pub fn get(&self, name: &str) -> Arc<dyn Runner> {
        self.runners
            .get(name)
            .or_else(|| self.runners.get("generic"))
            .cloned()
            .expect("registry always contains the generic runner")
    }
}
