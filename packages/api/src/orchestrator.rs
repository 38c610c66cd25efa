//! The orchestration facade: submission, status, stop-all and events.

use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use db::repositories::{JobRepository, WorkerRepository};
use db::{EventBroadcaster, Subscription};
use queue_core::{Job, JobEvent, JobHandle, JobId, JobSpec, OutputFile, QueueStats, WorkerInfo};
use serde::{Deserialize, Serialize};
use storage::{MediaDir, MediaFile, MediaStore};

use crate::config::{FaceSwapConfig, output_name};
use crate::error::ApiError;

/// A batch submission: one source face applied to every target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitBatchRequest {
    /// File name in the `source` directory.
    pub source: String,
    /// File names in the `target` directory.
    pub targets: Vec<String>,
    /// Options appended to every command, in order.
    #[serde(default)]
    pub extra_options: Vec<String>,
}

/// What `stop_all` did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopAllReport {
    /// Pending jobs removed from the queue.
    pub drained: Vec<JobHandle>,
    /// Workers asked to terminate their in-flight job.
    pub terminated_workers: Vec<String>,
}

/// Entry point for callers of the service.
#[derive(Clone)]
pub struct Orchestrator {
    media: MediaStore,
    faceswap: FaceSwapConfig,
    events: EventBroadcaster,
}

impl Orchestrator {
    /// The database must already be initialized.
    pub fn new(media: MediaStore, faceswap: FaceSwapConfig) -> Self {
        Self {
            media,
            faceswap,
            events: EventBroadcaster::events(),
        }
    }

    /// Initialize the database and build everything from the environment.
    pub async fn from_env() -> Result<Self, ApiError> {
        db::init(db::DbConfig::from_env()).await?;
        let media = MediaStore::from_env().await?;
        Ok(Self::new(media, FaceSwapConfig::from_env()))
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    /// Queue one job per target. Nothing is queued unless the whole
    /// request is valid.
    pub async fn submit_batch(&self, request: SubmitBatchRequest) -> Result<Vec<JobHandle>, ApiError> {
        let specs = self.prepare_batch(&request).await?;
        let jobs = JobRepository::enqueue_batch(specs).await?;

        tracing::info!(
            "Submitted {} jobs for source {}",
            jobs.len(),
            request.source
        );
        Ok(jobs.iter().map(Job::handle).collect())
    }

    async fn prepare_batch(&self, request: &SubmitBatchRequest) -> Result<Vec<JobSpec>, ApiError> {
        if request.source.trim().is_empty() {
            return Err(ApiError::InvalidRequest("source is required".into()));
        }
        if request.targets.is_empty() {
            return Err(ApiError::InvalidRequest("at least one target is required".into()));
        }

        self.require(MediaDir::Source, &request.source).await?;
        for target in &request.targets {
            self.require(MediaDir::Target, target).await?;
        }

        let source_path = self.media.path_of(MediaDir::Source, &request.source);
        let timestamp = Utc::now().timestamp();

        let specs = request
            .targets
            .iter()
            .enumerate()
            .map(|(index, target)| {
                let name = output_name(timestamp, index, &request.source, target);
                let command = self.faceswap.command(
                    &source_path,
                    &self.media.path_of(MediaDir::Target, target),
                    &self.media.path_of(MediaDir::Output, &name),
                    &request.extra_options,
                );
                JobSpec {
                    command,
                    output_file: OutputFile {
                        url: self.media.url(MediaDir::Output, &name),
                        name,
                    },
                }
            })
            .collect();

        Ok(specs)
    }

    async fn require(&self, dir: MediaDir, name: &str) -> Result<(), ApiError> {
        storage::validate_name(name)?;
        if self.media.exists(dir, name).await? {
            Ok(())
        } else {
            Err(ApiError::MissingMedia {
                dir,
                name: name.to_string(),
            })
        }
    }

    /// Pending jobs in queue order, then jobs being executed.
    pub async fn list_active_jobs(&self) -> Result<Vec<JobHandle>, ApiError> {
        let jobs = JobRepository::list_active().await?;
        Ok(jobs.iter().map(Job::handle).collect())
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job, ApiError> {
        Ok(JobRepository::get(job_id).await?)
    }

    /// Parse and look up a job id given as text.
    pub async fn get_job_str(&self, job_id: &str) -> Result<Job, ApiError> {
        let id = JobId::parse(job_id).map_err(|_| ApiError::InvalidJobId(job_id.to_string()))?;
        self.get_job(id).await
    }

    /// Drop every pending job and terminate every running one.
    ///
    /// The two steps are not atomic: a job claimed in between is either
    /// terminated too or runs to completion.
    pub async fn stop_all(&self) -> Result<StopAllReport, ApiError> {
        let drained = JobRepository::drain().await?;
        let terminated = actors::terminate_busy_workers().await?;

        let report = StopAllReport {
            drained: drained.iter().map(Job::handle).collect(),
            terminated_workers: terminated.into_iter().map(|w| w.name).collect(),
        };
        tracing::info!(
            "Stop all: drained {} jobs, terminated {} workers",
            report.drained.len(),
            report.terminated_workers.len()
        );
        Ok(report)
    }

    /// Lifecycle events from now on.
    pub async fn subscribe(&self) -> Result<Subscription<JobEvent>, ApiError> {
        Ok(self.events.subscribe().await?)
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerInfo>, ApiError> {
        Ok(WorkerRepository::list().await?)
    }

    pub async fn stats(&self) -> Result<QueueStats, ApiError> {
        Ok(JobRepository::stats().await?)
    }

    /// Delete finished jobs last updated more than `older_than` ago.
    pub async fn purge_finished(&self, older_than: Duration) -> Result<u64, ApiError> {
        let out_of_range =
            || ApiError::InvalidRequest(format!("purge age out of range: {:?}", older_than));
        let age = chrono::Duration::from_std(older_than).map_err(|_| out_of_range())?;
        let cutoff = Utc::now().checked_sub_signed(age).ok_or_else(out_of_range)?;
        Ok(JobRepository::purge_finished(cutoff).await?)
    }

    pub async fn list_files(&self, dir: MediaDir) -> Result<Vec<MediaFile>, ApiError> {
        Ok(self.media.list(dir).await?)
    }

    /// Store an uploaded source or target.
    pub async fn upload(
        &self,
        dir: MediaDir,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<MediaFile, ApiError> {
        if dir == MediaDir::Output {
            return Err(ApiError::InvalidRequest("uploads go to source or target".into()));
        }
        Ok(self.media.save_upload(dir, content_type, bytes).await?)
    }

    pub async fn delete_file(&self, dir: MediaDir, name: &str) -> Result<(), ApiError> {
        Ok(self.media.delete(dir, name).await?)
    }
}
