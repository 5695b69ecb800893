//! Checkpoint gating.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Decides when the next checkpoint pass is due.
///
/// Gates on elapsed wall-clock since the previous checkpoint. The mutex
/// makes `should_run` a serialization point: of all workers asking at
/// the same moment, exactly one gets `true`.
pub struct CheckpointTracker {
    interval: Duration,
    last_run: Mutex<Instant>,
}

impl CheckpointTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: Mutex::new(Instant::now()),
        }
    }

    /// Build a tracker from the configured interval in minutes. Zero
    /// means a checkpoint is always due; negative values fall back to
    /// the 30 minute default.
    pub fn from_minutes(minutes: i64) -> Self {
        let interval = if minutes < 0 {
            Duration::from_secs(30 * 60)
        } else {
            Duration::from_secs(minutes as u64 * 60)
        };
        Self::new(interval)
    }

    /// Whether a checkpoint is due. Resets the clock when it returns
    /// `true`, so the caller is committed to running the pass.
    pub fn should_run(&self) -> bool {
        let mut last_run = self.last_run.lock().unwrap_or_else(|e| e.into_inner());
        if last_run.elapsed() < self.interval {
            return false;
        }
        *last_run = Instant::now();
        true
    }
}
