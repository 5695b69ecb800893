//! Durable store for the atqos orchestrator.
//!
//! One SQLite file in WAL mode holds runs, artifacts, findings, tasks,
//! attempts, and the task/finding association. The file is a public
//! interface: post-run tooling may read it directly.

pub mod models;
pub mod store;

pub use store::SqliteStore;
