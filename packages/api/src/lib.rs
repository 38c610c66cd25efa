//! Orchestration API for the face-swap job service.
//!
//! This crate is what callers program against:
//! - Batch submission (one job per source/target pairing)
//! - Job status (active jobs, lookup, stats, purge)
//! - Stop-all (drain the queue and terminate running jobs)
//! - Real-time lifecycle events
//! - Media files in the `source`, `target` and `output` directories

mod config;
mod error;
mod orchestrator;

pub use config::{FaceSwapConfig, output_name};
pub use error::ApiError;
pub use orchestrator::{Orchestrator, StopAllReport, SubmitBatchRequest};

// Re-export core types for convenience
pub use queue_core::{
    EventKind, FailureReason, Job, JobEvent, JobHandle, JobId, JobState, JobStatus, OutputFile,
    QueueStats, WorkerInfo, WorkerStatus,
};
pub use storage::{MediaDir, MediaFile, MediaStore, UrlResolver};
