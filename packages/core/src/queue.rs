//! Queue-level aggregates.

use serde::{Deserialize, Serialize};

/// Job counts per lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    /// Number of queued jobs.
    pub pending: u64,
    /// Number of jobs currently executing.
    pub started: u64,
    /// Number of completed jobs not yet purged.
    pub completed: u64,
    /// Number of failed jobs not yet purged.
    pub failed: u64,
}

impl QueueStats {
    /// Total jobs in queue (pending + started).
    pub fn active(&self) -> u64 {
        self.pending + self.started
    }

    /// Total processed jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }
}
