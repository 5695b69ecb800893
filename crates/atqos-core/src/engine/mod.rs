//! Scheduler / worker pool.
//!
//! Workers drain the persistent task queue: claim, prepare a workspace,
//! invoke the agent, run the frozen validation commands, enforce write
//! boundaries, and transition the task. The store's claim protocol is
//! the only cross-worker ordering guarantee; within one worker the
//! sequence is strictly linear.

mod checkpoint;
mod enforcement;

pub use checkpoint::CheckpointTracker;
pub use enforcement::{check_diff, collect_diff_stats, DiffStats, EnforcementLimits};

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use atqos_store::models::{AttemptRecord, AttemptStatus, TaskRecord, TaskStatus};
use atqos_store::SqliteStore;

use crate::agent::{Agent, AgentRequest, ValidationCommands, SCHEMA_VERSION};
use crate::context::RunContext;
use crate::eventlog::Event;
use crate::plugin::Plugin;
use crate::runner::Command;
use crate::validation::ValidationSpec;
use crate::workspace::{Workspace, WorkspaceStrategy};

/// The worker pool driving one run's task queue to completion.
pub struct Executor {
    pub store: Arc<SqliteStore>,
    pub ctx: Arc<RunContext>,
    pub agent: Arc<dyn Agent>,
    pub strategy: Arc<dyn WorkspaceStrategy>,
    pub plugins: Vec<Arc<dyn Plugin>>,
}

impl Executor {
    /// Launch the configured number of workers and wait for the queue to
    /// drain (or cancellation). Worker ids are `worker-<n>` from 1.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let workers = self.ctx.config.max_workers.max(1);
        let tracker = Arc::new(CheckpointTracker::from_minutes(
            self.ctx.config.checkpoint_minutes,
        ));
        let agent_permits = Arc::new(Semaphore::new(self.ctx.config.max_agent_workers.max(1)));

        let mut handles = Vec::with_capacity(workers);
        for n in 1..=workers {
            let executor = Arc::clone(&self);
            let tracker = Arc::clone(&tracker);
            let permits = Arc::clone(&agent_permits);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .worker_loop(format!("worker-{n}"), tracker, permits, cancel)
                    .await;
            }));
        }

        for handle in handles {
            handle
                .await
                .map_err(|e| anyhow!("worker task failed: {e}"))?;
        }
        Ok(())
    }

    async fn worker_loop(
        &self,
        worker_id: String,
        tracker: Arc<CheckpointTracker>,
        agent_permits: Arc<Semaphore>,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                tracing::info!(worker = %worker_id, "worker stopping on cancellation");
                return;
            }

            let task = match self.store.claim_next_task(&self.ctx.run_id, &worker_id) {
                Ok(Some(task)) => task,
                Ok(None) => {
                    tracing::debug!(worker = %worker_id, "queue empty, worker exiting");
                    return;
                }
                Err(e) => {
                    tracing::error!(worker = %worker_id, error = %e, "task claim failed");
                    return;
                }
            };

            self.ctx.emit(
                Event::info(&self.ctx.run_id, "task_claimed")
                    .with_tool(&task.tool)
                    .with_task(task.id)
                    .with_payload(serde_json::json!({ "worker": worker_id })),
            );

            if let Err(e) = self.run_task(&task, &agent_permits, &cancel).await {
                tracing::warn!(task_id = task.id, error = %e, "task execution errored");
            }

            if tracker.should_run() {
                if let Err(e) = self.run_checkpoint().await {
                    // A failed checkpoint leaves previously inserted
                    // records in place; the run itself continues.
                    tracing::warn!(error = %e, "checkpoint pass failed");
                }
            }
        }
    }

    async fn run_task(
        &self,
        task: &TaskRecord,
        agent_permits: &Semaphore,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // v1 creates a single attempt per task; retry_policy_json is
        // carried on the task for a future revision that loops here.
        let attempt_id = match self.store.create_attempt(&AttemptRecord {
            id: 0,
            task_id: task.id,
            attempt_no: 1,
            status: AttemptStatus::Running,
            agent_name: Some(self.agent.name().to_string()),
            agent_exit_code: None,
            validation_exit_code: None,
            started_at: Utc::now(),
            finished_at: None,
            summary_json: None,
            diff_stats_json: None,
            artifacts_json: None,
        }) {
            Ok(id) => id,
            Err(e) => {
                let _ = self.store.update_task_status(
                    task.id,
                    TaskStatus::Blocked,
                    Some(r#"{"error":"failed to create attempt"}"#),
                );
                return Err(e);
            }
        };

        self.ctx.emit(
            Event::info(&self.ctx.run_id, "attempt_started")
                .with_tool(&task.tool)
                .with_task(task.id)
                .with_attempt(attempt_id),
        );

        let workspace = match self.strategy.prepare(&self.ctx.repo_path, task.id).await {
            Ok(workspace) => workspace,
            Err(e) => {
                self.block_task(task.id, attempt_id, "failed to prepare workspace");
                return Err(e).context("workspace preparation failed");
            }
        };

        let spec: ValidationSpec = match serde_json::from_str(&task.validation_json) {
            Ok(spec) => spec,
            Err(e) => {
                self.block_task(task.id, attempt_id, "invalid validation spec");
                self.finalize_workspace(&workspace).await;
                return Err(e).context("validation spec deserialization failed");
            }
        };

        let request = self.build_request(task, &workspace, &spec);

        // The semaphore bounds total agent concurrency across workers.
        let agent_outcome = {
            let _permit = agent_permits
                .acquire()
                .await
                .map_err(|e| anyhow!("agent semaphore closed: {e}"))?;
            tokio::select! {
                result = self.agent.invoke(&request) => result,
                _ = cancel.cancelled() => Err(anyhow!("run cancelled during agent invocation")),
            }
        };

        let agent_error = agent_outcome.as_ref().err().map(ToString::to_string);
        if let Some(ref error) = agent_error {
            tracing::warn!(task_id = task.id, error = %error, "agent invocation failed (advisory)");
        }

        // Enforcement looks at the workspace itself, never the agent's
        // self-reported manifest.
        let diff = collect_diff_stats(&workspace.path).await;
        let violations = match &diff {
            Some(stats) => {
                let read_only = self.read_only_paths();
                check_diff(
                    stats,
                    &EnforcementLimits {
                        allowed_paths: &self.ctx.config.allowed_paths,
                        read_only_paths: &read_only,
                        max_files_changed: self.ctx.config.max_files_changed,
                        max_lines_changed: self.ctx.config.max_lines_changed,
                    },
                )
            }
            None => {
                tracing::warn!(
                    task_id = task.id,
                    workspace = %workspace.path.display(),
                    "workspace is not a git checkout, skipping diff enforcement"
                );
                Vec::new()
            }
        };
        for violation in &violations {
            tracing::warn!(task_id = task.id, violation = %violation, "enforcement violation");
        }

        let diff_json = diff.as_ref().and_then(|d| serde_json::to_string(d).ok());
        let _ = self.store.record_attempt_agent(
            attempt_id,
            Some(i64::from(agent_error.is_some())),
            diff_json.as_deref(),
            None,
        );

        let validation_exit = if cancel.is_cancelled() {
            1
        } else {
            self.run_validation(&spec, &workspace).await
        };

        // The validation exit code, not the agent's claim, decides the
        // outcome.
        let succeeded = agent_error.is_none() && validation_exit == 0 && violations.is_empty();

        let summary = serde_json::json!({
            "agent": self.agent.name(),
            "agent_error": agent_error,
            "violations": violations,
            "validation_exit_code": validation_exit,
        });
        let attempt_status = if succeeded {
            AttemptStatus::Succeeded
        } else {
            AttemptStatus::Failed
        };
        if let Err(e) =
            self.store
                .finish_attempt(attempt_id, attempt_status, &summary.to_string(), validation_exit)
        {
            tracing::error!(attempt_id, error = %e, "failed to finish attempt");
        }

        let task_status = if succeeded {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Blocked
        };
        let extra = (!succeeded).then(|| summary.to_string());
        if let Err(e) = self
            .store
            .update_task_status(task.id, task_status, extra.as_deref())
        {
            tracing::error!(task_id = task.id, error = %e, "failed to update task status");
        }

        self.ctx.emit(
            Event::info(&self.ctx.run_id, "attempt_finished")
                .with_tool(&task.tool)
                .with_task(task.id)
                .with_attempt(attempt_id)
                .with_payload(serde_json::json!({
                    "status": attempt_status.to_string(),
                    "validation_exit_code": validation_exit,
                })),
        );

        self.finalize_workspace(&workspace).await;
        Ok(())
    }

    fn build_request(
        &self,
        task: &TaskRecord,
        workspace: &Workspace,
        spec: &ValidationSpec,
    ) -> AgentRequest {
        AgentRequest {
            schema_version: SCHEMA_VERSION,
            run_id: self.ctx.run_id.clone(),
            task_id: task.id,
            task_type: task.task_type.to_string(),
            tool: task.tool.clone(),
            repo_path: self.ctx.repo_path.to_string_lossy().into_owned(),
            workspace_path: workspace.path.to_string_lossy().into_owned(),
            allowed_paths: self.ctx.config.allowed_paths.clone(),
            read_only_paths: self.read_only_paths(),
            targets: serde_json::from_str(&task.targets_json).ok(),
            instructions: task.description.clone(),
            validation: ValidationCommands {
                commands: spec.command_lines(),
            },
        }
    }

    fn read_only_paths(&self) -> Vec<String> {
        vec![
            ".git".to_string(),
            self.ctx.artifact_root.to_string_lossy().into_owned(),
        ]
    }

    /// Execute every command in the spec with `allow_nonzero`, keeping
    /// the last non-zero exit. Zero only if all commands exit zero; an
    /// empty command set is vacuous success.
    async fn run_validation(&self, spec: &ValidationSpec, workspace: &Workspace) -> i64 {
        let mut exit_code: i64 = 0;
        for command in &spec.commands {
            let runner = self.ctx.runners.get(&command.runner);
            let result = runner
                .run(Command {
                    args: command.args.clone(),
                    env: command.env.clone(),
                    cwd: Some(workspace.path.clone()),
                    timeout_seconds: command.timeout_seconds,
                    allow_nonzero: true,
                    ..Command::default()
                })
                .await;
            match result {
                Ok(result) if result.exit_code != 0 => exit_code = i64::from(result.exit_code),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, args = ?command.args, "validation command failed to run");
                    exit_code = 1;
                }
            }
        }
        exit_code
    }

    fn block_task(&self, task_id: i64, attempt_id: i64, reason: &str) {
        let detail = serde_json::json!({ "error": reason }).to_string();
        if let Err(e) = self
            .store
            .update_task_status(task_id, TaskStatus::Blocked, Some(detail.as_str()))
        {
            tracing::error!(task_id, error = %e, "failed to block task");
        }
        if let Err(e) = self
            .store
            .finish_attempt(attempt_id, AttemptStatus::Failed, &detail, 1)
        {
            tracing::error!(attempt_id, error = %e, "failed to fail attempt");
        }
    }

    async fn finalize_workspace(&self, workspace: &Workspace) {
        if let Err(e) = self.strategy.finalize(workspace).await {
            tracing::warn!(
                workspace = %workspace.path.display(),
                error = %e,
                "workspace finalize failed"
            );
        }
    }

    /// Re-run every enabled plugin's collect/normalize/plan and append
    /// the results. Stable fingerprints make the duplicates this
    /// produces resolvable at read time.
    pub async fn run_checkpoint(&self) -> Result<()> {
        self.ctx
            .emit(Event::info(&self.ctx.run_id, "checkpoint_started"));

        for plugin in &self.plugins {
            if !self.ctx.config.plugin_enabled(plugin.id()) {
                continue;
            }
            run_plugin_pipeline(&self.store, &self.ctx, plugin.as_ref()).await?;
        }

        self.ctx
            .emit(Event::info(&self.ctx.run_id, "checkpoint_finished"));
        Ok(())
    }
}

/// One full collect -> normalize -> plan pass for a plugin, persisting
/// everything it produces. Each task's `validation_json` is frozen here
/// by calling the plugin's validation_spec before insertion. Returns
/// `(findings, tasks)` counts.
pub async fn run_plugin_pipeline(
    store: &SqliteStore,
    ctx: &RunContext,
    plugin: &dyn Plugin,
) -> Result<(usize, usize)> {
    let tool = plugin.id().to_string();

    ctx.emit(Event::info(&ctx.run_id, "collect_started").with_tool(&tool));
    let artifacts = plugin
        .collect(ctx)
        .await
        .with_context(|| format!("plugin {tool} collect failed"))?;
    ctx.emit(
        Event::info(&ctx.run_id, "collect_finished")
            .with_tool(&tool)
            .with_payload(serde_json::json!({ "artifact_count": artifacts.items.len() })),
    );
    for artifact in &artifacts.items {
        store.add_artifact(artifact)?;
    }

    let findings = plugin
        .normalize(ctx, &artifacts)
        .await
        .with_context(|| format!("plugin {tool} normalize failed"))?;
    ctx.emit(
        Event::info(&ctx.run_id, "normalize_finished")
            .with_tool(&tool)
            .with_payload(serde_json::json!({ "finding_count": findings.len() })),
    );
    store.insert_findings(&findings)?;

    let mut tasks = plugin
        .plan(ctx, &findings)
        .await
        .with_context(|| format!("plugin {tool} plan failed"))?;
    ctx.emit(
        Event::info(&ctx.run_id, "plan_finished")
            .with_tool(&tool)
            .with_payload(serde_json::json!({ "task_count": tasks.len() })),
    );

    for task in &mut tasks {
        let spec = plugin
            .validation_spec(ctx, task)
            .await
            .with_context(|| format!("plugin {tool} validation_spec failed"))?;
        task.validation_json =
            serde_json::to_string(&spec).context("failed to serialize validation spec")?;
    }
    store.insert_tasks(&tasks)?;

    Ok((findings.len(), tasks.len()))
}
