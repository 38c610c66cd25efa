//! Worker descriptors and the commands sent to workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Whether a worker is executing a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Idle,
    Busy,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker as registered in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Unique worker name.
    pub name: String,
    /// Host the worker process runs on.
    pub host: String,
    /// OS process id of the worker process.
    pub pid: u32,
    pub status: WorkerStatus,
    /// The in-flight job; set exactly when `status` is `Busy`.
    pub current_job: Option<JobId>,
    pub registered_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

impl WorkerInfo {
    pub fn new(name: impl Into<String>, host: impl Into<String>, pid: u32) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            host: host.into(),
            pid,
            status: WorkerStatus::Idle,
            current_job: None,
            registered_at: now,
            heartbeat_at: now,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.status == WorkerStatus::Busy
    }
}

/// Commands delivered to workers over the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Kill the external process the named worker is running, if any.
    Terminate { worker: String },
}

impl WorkerCommand {
    /// Name of the worker the command is addressed to.
    pub fn worker(&self) -> &str {
        match self {
            WorkerCommand::Terminate { worker } => worker,
        }
    }
}
