//! Core domain types for the face-swap job queue.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and the lifecycle state machine
//! - CommandSpec, the typed external invocation a job runs
//! - Events broadcast on lifecycle transitions
//! - Worker descriptors and control commands

mod command;
mod events;
mod job;
mod queue;
mod worker;

pub use command::CommandSpec;
pub use events::{EventKind, JobEvent};
pub use job::{
    FailureReason, Job, JobHandle, JobId, JobSpec, JobState, JobStatus, LifecycleError,
    OutputFile,
};
pub use queue::QueueStats;
pub use worker::{WorkerCommand, WorkerInfo, WorkerStatus};
