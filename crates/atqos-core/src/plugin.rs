//! The tool plugin contract.
//!
//! A plugin owns one diagnostic tool end to end: it runs the tool
//! (collect), turns raw artifacts into findings (normalize), derives
//! bounded tasks from findings (plan), and freezes the deterministic
//! command sequence that verifies any attempt on such a task
//! (validation_spec). Plugins never mutate shared state; their only
//! observable effect is the artifacts and records they return.

use anyhow::Result;
use async_trait::async_trait;

use atqos_store::models::{ArtifactRecord, FindingRecord, TaskRecord};

use crate::context::RunContext;
use crate::validation::ValidationSpec;

/// Artifacts produced by one plugin's collect pass. Pointers only, never
/// contents.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub plugin_id: String,
    pub items: Vec<ArtifactRecord>,
}

/// A tool integration.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable plugin id, also used as the artifact subdirectory name and
    /// the `tool` column on findings and tasks.
    fn id(&self) -> &str;

    /// Run the tool against the target repository and write raw
    /// artifacts under the plugin's subdirectory of the artifact root.
    /// Must tolerate the tool exiting non-zero.
    async fn collect(&self, rc: &RunContext) -> Result<ArtifactSet>;

    /// Pure transformation from artifacts to findings. Every finding
    /// carries a fingerprint derived from semantic identity, never from
    /// wall-clock or path nonces.
    async fn normalize(
        &self,
        rc: &RunContext,
        artifacts: &ArtifactSet,
    ) -> Result<Vec<FindingRecord>>;

    /// Derive tasks from findings. `validation_json` is left empty; the
    /// kernel fills it by calling [`Plugin::validation_spec`] before the
    /// tasks are persisted.
    async fn plan(&self, rc: &RunContext, findings: &[FindingRecord]) -> Result<Vec<TaskRecord>>;

    /// Produce the frozen command sequence verifying attempts on a task.
    async fn validation_spec(&self, rc: &RunContext, task: &TaskRecord) -> Result<ValidationSpec>;
}

// Compile-time assertion: plugins are stored as trait objects.
const _: () = {
    fn _assert_object_safe(_: &dyn Plugin) {}
};
