//! Run controller: opens the run, wires the components, seeds the queue,
//! drives the worker pool, and writes the final summary artifact.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use atqos_store::models::{
    format_instant, new_run_id, ArtifactRecord, RunRecord, RunStatus,
};
use atqos_store::SqliteStore;

use crate::agent::{agent_from_env, Agent};
use crate::config::{Config, GitStrategyKind};
use crate::context::RunContext;
use crate::engine::{run_plugin_pipeline, Executor};
use crate::eventlog::{Event, EventLog};
use crate::plugin::Plugin;
use crate::plugins::coverage::CoveragePlugin;
use crate::plugins::pytest::PytestPlugin;
use crate::probe::RepoProbe;
use crate::runner::RunnerRegistry;
use crate::workspace::{InPlaceStrategy, WorkspaceStrategy, WorktreeStrategy};

/// Counts accumulated while seeding the queue.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Summary {
    pub findings: usize,
    pub tasks: usize,
}

/// Final state of a completed run command.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub summary: Summary,
}

/// The on-disk `summary.json` shape.
#[derive(Debug, Serialize)]
struct RunReport {
    run_id: String,
    status: String,
    findings: i64,
    tasks: i64,
    started_at: String,
    finished_at: String,
    summary: Summary,
}

/// One orchestration pass over a repository.
pub struct RunCommand {
    pub repo_path: PathBuf,
    pub artifact_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: Option<PathBuf>,
}

impl RunCommand {
    /// Run with the default plugin set and the environment-selected
    /// agent adapter.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunOutcome> {
        let plugins: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(PytestPlugin::new()),
            Arc::new(CoveragePlugin::new()),
        ];
        self.run_with(cancel, plugins, agent_from_env()).await
    }

    /// Run with explicit plugins and agent.
    pub async fn run_with(
        &self,
        cancel: CancellationToken,
        plugins: Vec<Arc<dyn Plugin>>,
        agent: Arc<dyn Agent>,
    ) -> Result<RunOutcome> {
        // Input and config problems surface before any run is created.
        let mut config = Config::load(self.config_path.as_deref())?;
        if !self.repo_path.is_dir() {
            bail!("repo path {} is not a directory", self.repo_path.display());
        }

        // Parallel workers sharing one working tree would collide.
        if config.git_strategy == GitStrategyKind::InPlace && config.max_workers > 1 {
            tracing::warn!(
                max_workers = config.max_workers,
                "in_place strategy forces a single worker"
            );
            config.max_workers = 1;
        }

        let run_id = new_run_id();
        let artifact_root = self.artifact_dir.join(&run_id);
        std::fs::create_dir_all(&artifact_root).with_context(|| {
            format!("failed to create artifact root {}", artifact_root.display())
        })?;

        let event_log = Arc::new(EventLog::new(artifact_root.join("events.jsonl"))?);

        let store = Arc::new(SqliteStore::open(&self.db_path)?);
        store.init()?;

        let config_json =
            serde_json::to_string(&config).context("failed to serialize config")?;
        store.create_run(&RunRecord {
            run_id: run_id.clone(),
            repo_path: self.repo_path.to_string_lossy().into_owned(),
            started_at: Utc::now(),
            status: RunStatus::Running,
            config_json,
        })?;

        let ctx = Arc::new(RunContext {
            run_id: run_id.clone(),
            repo_path: self.repo_path.clone(),
            artifact_root: artifact_root.clone(),
            runners: RunnerRegistry::new(&artifact_root),
            event_log,
            config,
            probe: RepoProbe::new(),
        });

        ctx.emit(
            Event::info(&run_id, "run_started").with_payload(serde_json::json!({
                "repo_path": ctx.repo_path.to_string_lossy(),
            })),
        );

        // Seed the queue: collect -> normalize -> plan for each enabled
        // plugin. Plugin and store failures here abort the run.
        let mut summary = Summary::default();
        for plugin in &plugins {
            if !ctx.config.plugin_enabled(plugin.id()) {
                continue;
            }
            match run_plugin_pipeline(&store, &ctx, plugin.as_ref()).await {
                Ok((findings, tasks)) => {
                    summary.findings += findings;
                    summary.tasks += tasks;
                }
                Err(e) => return finalize_failure(&store, &ctx, summary, e),
            }
        }

        let strategy: Arc<dyn WorkspaceStrategy> = match ctx.config.git_strategy {
            GitStrategyKind::Worktree => {
                Arc::new(WorktreeStrategy::new(artifact_root.join("worktrees")))
            }
            GitStrategyKind::InPlace => Arc::new(InPlaceStrategy::new()),
        };

        let executor = Arc::new(Executor {
            store: Arc::clone(&store),
            ctx: Arc::clone(&ctx),
            agent,
            strategy,
            plugins,
        });
        if let Err(e) = executor.run(cancel.clone()).await {
            return finalize_failure(&store, &ctx, summary, e);
        }

        if cancel.is_cancelled() {
            let summary_json = serde_json::json!({
                "findings": summary.findings,
                "tasks": summary.tasks,
                "reason": "cancelled",
            });
            store.update_run_status(&run_id, RunStatus::Failed, &summary_json.to_string())?;
            ctx.emit(
                Event::error(&run_id, "run_failed")
                    .with_payload(serde_json::json!({ "error": "cancelled" })),
            );
            return Ok(RunOutcome {
                run_id,
                status: RunStatus::Failed,
                summary,
            });
        }

        let summary_json =
            serde_json::to_string(&summary).context("failed to serialize summary")?;
        store.update_run_status(&run_id, RunStatus::Succeeded, &summary_json)?;

        // The summary artifact is the machine-readable run report.
        let run_summary = store.get_run_summary(&run_id)?;
        let report = RunReport {
            run_id: run_id.clone(),
            status: run_summary.status.to_string(),
            findings: run_summary.findings,
            tasks: run_summary.tasks,
            started_at: format_instant(run_summary.started),
            finished_at: run_summary
                .finished
                .map(format_instant)
                .unwrap_or_default(),
            summary,
        };
        let report_path = artifact_root.join("summary.json");
        let report_json =
            serde_json::to_vec_pretty(&report).context("failed to serialize run report")?;
        std::fs::write(&report_path, &report_json)
            .with_context(|| format!("failed to write {}", report_path.display()))?;
        store.add_artifact(&ArtifactRecord {
            run_id: run_id.clone(),
            tool: None,
            kind: "summary".to_string(),
            path: report_path.to_string_lossy().into_owned(),
            sha256: None,
            size_bytes: report_json.len() as i64,
            created_at: Utc::now(),
            meta_json: None,
        })?;

        ctx.emit(
            Event::info(&run_id, "run_finished").with_payload(serde_json::json!({
                "status": RunStatus::Succeeded.to_string(),
            })),
        );

        Ok(RunOutcome {
            run_id,
            status: RunStatus::Succeeded,
            summary,
        })
    }
}

/// Mark the run failed, record why, and propagate the original error.
/// Previously inserted records stay in place.
fn finalize_failure(
    store: &SqliteStore,
    ctx: &RunContext,
    summary: Summary,
    error: anyhow::Error,
) -> Result<RunOutcome> {
    let summary_json = serde_json::to_string(&summary).unwrap_or_else(|_| "{}".to_string());
    store
        .update_run_status(&ctx.run_id, RunStatus::Failed, &summary_json)
        .context("failed to mark run as failed")?;
    ctx.emit(
        Event::error(&ctx.run_id, "run_failed")
            .with_payload(serde_json::json!({ "error": error.to_string() })),
    );
    Err(error)
}
