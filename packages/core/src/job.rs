//! Job domain types and the lifecycle state machine.

use std::sync::{LazyLock, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

use crate::CommandSpec;

/// Process-wide monotonic generator, so ids minted in one process sort in
/// the order they were created even within the same millisecond.
static ID_GENERATOR: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID, greater than every ID created before it
    /// in this process.
    pub fn new() -> Self {
        let next = ID_GENERATOR
            .lock()
            .ok()
            .and_then(|mut generator| generator.generate().ok());
        Self(next.unwrap_or_else(Ulid::new))
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical output file of a job: its name in the `output` directory and
/// the URL it can be retrieved from once the job completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub name: String,
    pub url: String,
}

/// Everything needed to create a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub command: CommandSpec,
    pub output_file: OutputFile,
}

/// The handle returned to callers: the job id and where its output will be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: JobId,
    pub output_file: OutputFile,
}

/// Fieldless view of [`JobStatus`], used for queries and transition checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Started,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Started => "started",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Started)
                | (JobState::Started, JobState::Completed)
                | (JobState::Started, JobState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a started job ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The command ran and exited unsuccessfully. `code` is absent when the
    /// process was ended by a signal.
    Exited { code: Option<i32> },
    /// The command was killed on request (stop-all).
    Terminated,
    /// The command could not be started at all.
    SpawnFailed { message: String },
    /// The worker stopped renewing its lease, usually because it crashed.
    LeaseExpired,
    /// The job was claimed for a worker that was no longer waiting for it.
    Undelivered,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Exited { code: Some(code) } => write!(f, "exited with status {}", code),
            FailureReason::Exited { code: None } => write!(f, "killed by signal"),
            FailureReason::Terminated => write!(f, "terminated on request"),
            FailureReason::SpawnFailed { message } => write!(f, "failed to start: {}", message),
            FailureReason::LeaseExpired => write!(f, "worker lease expired"),
            FailureReason::Undelivered => write!(f, "claimed job never reached its worker"),
        }
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting to be claimed by a worker.
    #[default]
    Queued,
    /// Job is being executed by `worker`.
    Started {
        started_at: DateTime<Utc>,
        worker: String,
    },
    /// The command exited successfully.
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        worker: String,
    },
    /// The command failed, was terminated, or its worker vanished.
    Failed {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        worker: String,
        reason: FailureReason,
    },
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        match self {
            JobStatus::Queued => JobState::Queued,
            JobStatus::Started { .. } => JobState::Started,
            JobStatus::Completed { .. } => JobState::Completed,
            JobStatus::Failed { .. } => JobState::Failed,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Name of the worker that claimed the job, once it has been claimed.
    pub fn worker(&self) -> Option<&str> {
        match self {
            JobStatus::Queued => None,
            JobStatus::Started { worker, .. }
            | JobStatus::Completed { worker, .. }
            | JobStatus::Failed { worker, .. } => Some(worker),
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobStatus::Queued => None,
            JobStatus::Started { started_at, .. }
            | JobStatus::Completed { started_at, .. }
            | JobStatus::Failed { started_at, .. } => Some(*started_at),
        }
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        self.state().as_str()
    }
}

/// Rejected lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("job {job_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },
}

/// A job represents one source/target pairing to be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// External process to run.
    pub command: CommandSpec,
    /// Where the result will be written and served from.
    pub output_file: OutputFile,
    /// Current status.
    pub status: JobStatus,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the job last changed state.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new queued job from a spec.
    pub fn new(spec: JobSpec) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            command: spec.command,
            output_file: spec.output_file,
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> JobState {
        self.status.state()
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            job_id: self.id,
            output_file: self.output_file.clone(),
        }
    }

    fn check(&self, to: JobState) -> Result<(), LifecycleError> {
        let from = self.state();
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition {
                job_id: self.id,
                from,
                to,
            })
        }
    }

    /// `Queued -> Started`.
    pub fn start(&mut self, worker: impl Into<String>, at: DateTime<Utc>) -> Result<(), LifecycleError> {
        self.check(JobState::Started)?;
        self.status = JobStatus::Started {
            started_at: at,
            worker: worker.into(),
        };
        self.updated_at = at;
        Ok(())
    }

    /// `Started -> Completed`.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), LifecycleError> {
        self.check(JobState::Completed)?;
        if let JobStatus::Started { started_at, worker } = std::mem::take(&mut self.status) {
            self.status = JobStatus::Completed {
                started_at,
                completed_at: at,
                worker,
            };
        }
        self.updated_at = at;
        Ok(())
    }

    /// `Started -> Failed`.
    pub fn fail(&mut self, reason: FailureReason, at: DateTime<Utc>) -> Result<(), LifecycleError> {
        self.check(JobState::Failed)?;
        if let JobStatus::Started { started_at, worker } = std::mem::take(&mut self.status) {
            self.status = JobStatus::Failed {
                started_at,
                failed_at: at,
                worker,
                reason,
            };
        }
        self.updated_at = at;
        Ok(())
    }
}
