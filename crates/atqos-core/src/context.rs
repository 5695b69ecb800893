//! Shared per-run wiring handed to plugins and the worker pool.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::eventlog::{Event, EventLog};
use crate::probe::RepoProbe;
use crate::runner::RunnerRegistry;

/// Everything a plugin or worker needs to act within one run.
pub struct RunContext {
    pub run_id: String,
    pub repo_path: PathBuf,
    pub artifact_root: PathBuf,
    pub runners: RunnerRegistry,
    pub event_log: Arc<EventLog>,
    pub config: Config,
    pub probe: RepoProbe,
}

impl RunContext {
    /// Emit a telemetry event. The log is a side channel: failures are
    /// logged and swallowed so they cannot affect run correctness.
    pub fn emit(&self, event: Event) {
        if let Err(e) = self.event_log.emit(&event) {
            tracing::warn!(error = %e, event_type = %event.event_type, "failed to emit event");
        }
    }
}
