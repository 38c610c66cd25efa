//! Message types for actor communication.

use queue_core::{FailureReason, Job, JobId, WorkerCommand};
use ractor::RpcReplyPort;

use crate::runner::RunOutcome;

/// Messages for the QueueActor, the process-local dispatcher that owns
/// every interaction with the shared queue.
#[derive(Debug)]
pub enum QueueMessage {
    /// Claim the oldest pending job for a worker.
    Claim {
        worker: String,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// Report the outcome of a job the worker ran.
    Report {
        job_id: JobId,
        worker: String,
        outcome: Result<(), FailureReason>,
    },

    /// Extend the lease of a running job.
    RenewLease { job_id: JobId, worker: String },

    /// Record that an idle worker is alive.
    Heartbeat { worker: String },

    /// Fail jobs whose lease expired and forget silent workers.
    Reap,

    /// Shutdown the dispatcher once queued messages are handled.
    Shutdown,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Poll tick: claim work when idle, renew the lease when busy.
    Heartbeat,

    /// The command of the current job finished.
    Finished { job_id: JobId, outcome: RunOutcome },

    /// Kill the current job, if any.
    Terminate,

    /// Check if worker is idle.
    IsIdle { reply: RpcReplyPort<bool> },

    /// Shutdown the worker, terminating its current job.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// A command received on the shared control channel.
    Command(WorkerCommand),

    /// The control channel subscription ended; subscribe again.
    ControlClosed,

    /// Names of the workers in this pool.
    ListWorkers { reply: RpcReplyPort<Vec<String>> },

    /// Stop all workers, then the dispatcher, then the supervisor.
    Shutdown,

    /// Periodic tick for housekeeping.
    Tick,
}

/// Error type for actor operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Database error: {0}")]
    Database(#[from] db::DbError),

    #[error("Spawn error: {0}")]
    Spawn(#[from] ractor::SpawnErr),

    #[error("Timeout")]
    Timeout,
}
