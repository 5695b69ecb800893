use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use atqos_core::controller::RunCommand;
use atqos_store::models::RunStatus;

/// Non-interactive repair orchestrator: runs diagnostic tools against a
/// repository, derives remediation tasks, delegates them to external
/// agents, and validates every result deterministically.
#[derive(Parser)]
#[command(name = "atqos", version)]
struct Cli {
    /// Path to repository root
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Artifact output directory
    #[arg(long, default_value = "artifacts")]
    artifacts: PathBuf,

    /// SQLite database path
    #[arg(long, default_value = "artifacts/atqos.db")]
    db: PathBuf,

    /// Optional config file path
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Resolve a possibly-relative path against the current directory.
fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    Ok(cwd.join(path))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let command = RunCommand {
        repo_path: absolutize(cli.repo)?,
        artifact_dir: absolutize(cli.artifacts)?,
        db_path: absolutize(cli.db)?,
        config_path: cli.config.map(absolutize).transpose()?,
    };

    // Interrupt and terminate cancel the run context; every suspension
    // point downstream observes the token.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut sigterm =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("failed to install SIGTERM handler");
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            tracing::info!("cancellation requested");
            cancel.cancel();
        });
    }

    let outcome = command.run(cancel).await.map_err(|e| {
        tracing::error!(error = %format!("{e:#}"), "run failed");
        e
    })?;

    println!(
        "Run {} finished with status {}",
        outcome.run_id, outcome.status
    );
    println!(
        "findings: {}, tasks: {}",
        outcome.summary.findings, outcome.summary.tasks
    );

    if outcome.status != RunStatus::Succeeded {
        std::process::exit(1);
    }
    Ok(())
}
