//! Event types for real-time updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FailureReason, Job, JobId, JobStatus, OutputFile};

/// Wire names of the three lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobStart,
    JobCompleted,
    JobFailed,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::JobStart => "job_start",
            EventKind::JobCompleted => "job_completed",
            EventKind::JobFailed => "job_failed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted on job lifecycle transitions.
///
/// Every variant carries the job id and output file, which is all a
/// listener needs to update its view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A worker claimed the job and is starting the command.
    JobStart {
        job_id: JobId,
        output_file: OutputFile,
        worker: String,
        timestamp: DateTime<Utc>,
    },
    /// The command exited successfully.
    JobCompleted {
        job_id: JobId,
        output_file: OutputFile,
        timestamp: DateTime<Utc>,
    },
    /// The command failed or was terminated.
    JobFailed {
        job_id: JobId,
        output_file: OutputFile,
        reason: FailureReason,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// The event announcing the state `job` is currently in.
    ///
    /// Returns `None` for queued jobs: enqueueing is not broadcast.
    pub fn for_transition(job: &Job) -> Option<Self> {
        let job_id = job.id;
        let output_file = job.output_file.clone();
        match &job.status {
            JobStatus::Queued => None,
            JobStatus::Started { started_at, worker } => Some(JobEvent::JobStart {
                job_id,
                output_file,
                worker: worker.clone(),
                timestamp: *started_at,
            }),
            JobStatus::Completed { completed_at, .. } => Some(JobEvent::JobCompleted {
                job_id,
                output_file,
                timestamp: *completed_at,
            }),
            JobStatus::Failed {
                failed_at, reason, ..
            } => Some(JobEvent::JobFailed {
                job_id,
                output_file,
                reason: reason.clone(),
                timestamp: *failed_at,
            }),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            JobEvent::JobStart { .. } => EventKind::JobStart,
            JobEvent::JobCompleted { .. } => EventKind::JobCompleted,
            JobEvent::JobFailed { .. } => EventKind::JobFailed,
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::JobStart { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. } => *job_id,
        }
    }

    pub fn output_file(&self) -> &OutputFile {
        match self {
            JobEvent::JobStart { output_file, .. }
            | JobEvent::JobCompleted { output_file, .. }
            | JobEvent::JobFailed { output_file, .. } => output_file,
        }
    }

    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobStart { timestamp, .. }
            | JobEvent::JobCompleted { timestamp, .. }
            | JobEvent::JobFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobStart {
                job_id,
                output_file,
                worker,
                ..
            } => format!("Job {} ({}) started by {}", job_id, output_file.name, worker),
            JobEvent::JobCompleted {
                job_id,
                output_file,
                ..
            } => format!("Job {} ({}) completed", job_id, output_file.name),
            JobEvent::JobFailed {
                job_id,
                output_file,
                reason,
                ..
            } => format!("Job {} ({}) failed: {}", job_id, output_file.name, reason),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use crate::{CommandSpec, JobSpec};

    fn job() -> Job {
        Job::new(JobSpec {
            command: CommandSpec::new("true"),
            output_file: OutputFile {
                name: "1700000000_a_b.jpg".into(),
                url: "http://media/files/output/1700000000_a_b.jpg".into(),
            },
        })
    }

    #[test]
    fn one_event_per_non_queued_state() {
        let mut job = job();
        assert!(JobEvent::for_transition(&job).is_none());

        job.start("worker-1", Utc::now()).unwrap();
        let started = JobEvent::for_transition(&job).unwrap();
        assert_eq!(started.kind(), EventKind::JobStart);
        assert_eq!(started.job_id(), job.id);

        job.complete(Utc::now()).unwrap();
        let completed = JobEvent::for_transition(&job).unwrap();
        assert_eq!(completed.kind(), EventKind::JobCompleted);
        assert_eq!(completed.output_file(), &job.output_file);
    }

    #[test]
    fn failure_event_carries_reason() {
        let mut job = job();
        job.start("worker-1", Utc::now()).unwrap();
        job.fail(FailureReason::Terminated, Utc::now()).unwrap();

        let event = JobEvent::for_transition(&job).unwrap();
        assert_eq!(event.kind(), EventKind::JobFailed);
        assert!(event.description().contains("terminated on request"));
    }

    #[test]
    fn wire_format_uses_event_names() {
        let mut job = job();
        job.start("worker-1", Utc::now()).unwrap();
        let value = serde_json::to_value(JobEvent::for_transition(&job).unwrap()).unwrap();

        assert_eq!(value["event"], "job_start");
        assert_eq!(value["job_id"], job.id.to_string());
        assert_eq!(value["output_file"]["name"], "1700000000_a_b.jpg");
    }
}
