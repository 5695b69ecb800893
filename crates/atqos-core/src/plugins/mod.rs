//! Concrete tool plugins.

pub mod coverage;
pub mod pytest;

use std::path::Path;

use chrono::Utc;
use sha2::{Digest, Sha256};

use atqos_store::models::ArtifactRecord;

/// Hex-encoded sha256 over `parts` joined with `|` -- the shared
/// fingerprint recipe. Inputs are semantic identity only.
pub(crate) fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    hex::encode(hasher.finalize())
}

/// Build an artifact record for a file a tool just wrote, hashing and
/// sizing it when present. Tools may exit before writing the file; the
/// record then points at the expected path with zero size.
pub(crate) fn artifact_record(run_id: &str, tool: &str, kind: &str, path: &Path) -> ArtifactRecord {
    let (sha256, size_bytes) = match std::fs::read(path) {
        Ok(data) => {
            let mut hasher = Sha256::new();
            hasher.update(&data);
            (Some(hex::encode(hasher.finalize())), data.len() as i64)
        }
        Err(_) => (None, 0),
    };
    ArtifactRecord {
        run_id: run_id.to_string(),
        tool: Some(tool.to_string()),
        kind: kind.to_string(),
        path: path.to_string_lossy().into_owned(),
        sha256,
        size_bytes,
        created_at: Utc::now(),
        meta_json: None,
    }
}
