//! Queue actor: the per-process dispatcher between workers and the store.
//!
//! All workers of a pool claim and report through this actor, so claims
//! from one process are serialized before they reach the shared store.
//! Every successful transition is published on the event channel.

use std::time::Duration;

use db::EventBroadcaster;
use db::repositories::{JobRepository, WorkerRepository};
use queue_core::{FailureReason, Job, JobEvent, JobId};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::QueueMessage;

/// State for the queue actor.
pub struct QueueActorState {
    /// Lease granted on each claim and renewal.
    lease: Duration,
    /// Workers silent for longer than this are reaped.
    stale_after: Duration,
    /// Event broadcaster.
    events: EventBroadcaster,
}

impl QueueActorState {
    pub fn new(lease: Duration, stale_after: Duration) -> Self {
        Self {
            lease,
            stale_after,
            events: EventBroadcaster::events(),
        }
    }

    /// Publish the event for the job's current state.
    async fn broadcast(&self, job: &Job) {
        let Some(event) = JobEvent::for_transition(job) else {
            return;
        };
        if let Err(e) = self.events.publish(event).await {
            tracing::warn!("Failed to publish event for job {}: {}", job.id, e);
        }
    }

    async fn claim(&self, worker: &str) -> Option<Job> {
        let job = match JobRepository::claim_next(worker, self.lease).await {
            Ok(Some(job)) => job,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Worker {} failed to claim a job: {}", worker, e);
                return None;
            }
        };

        if let Err(e) = WorkerRepository::mark_busy(worker, job.id).await {
            tracing::warn!("Failed to mark worker {} busy: {}", worker, e);
        }

        tracing::info!("Worker {} started job {} ({})", worker, job.id, job.output_file.name);
        self.broadcast(&job).await;
        Some(job)
    }

    async fn report(&self, job_id: JobId, worker: &str, outcome: Result<(), FailureReason>) {
        match JobRepository::finish(job_id, worker, outcome).await {
            Ok(Some(job)) => {
                tracing::info!("Job {} {} on worker {}", job.id, job.state(), worker);
                self.broadcast(&job).await;
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Failed to record outcome of job {}: {}", job_id, e),
        }

        if let Err(e) = WorkerRepository::mark_idle(worker).await {
            tracing::warn!("Failed to mark worker {} idle: {}", worker, e);
        }
    }

    async fn reap(&self) {
        match JobRepository::expire_leases().await {
            Ok(expired) => {
                for job in &expired {
                    self.broadcast(job).await;
                }
            }
            Err(e) => tracing::warn!("Failed to expire leases: {}", e),
        }

        if let Err(e) = WorkerRepository::remove_stale(self.stale_after).await {
            tracing::warn!("Failed to remove stale workers: {}", e);
        }
    }
}

/// Queue actor that serializes queue access for one pool.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue dispatcher (lease {:?})", args.lease);
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Claim { worker, reply } => {
                let job = state.claim(&worker).await;
                let job_id = job.as_ref().map(|j| j.id);
                if reply.send(job).is_err()
                    && let Some(job_id) = job_id
                {
                    tracing::warn!("Worker {} went away before receiving job {}", worker, job_id);
                    state
                        .report(job_id, &worker, Err(FailureReason::Undelivered))
                        .await;
                }
            }

            QueueMessage::Report {
                job_id,
                worker,
                outcome,
            } => {
                state.report(job_id, &worker, outcome).await;
            }

            QueueMessage::RenewLease { job_id, worker } => {
                match JobRepository::renew_lease(job_id, &worker, state.lease).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!("Worker {} no longer holds job {}", worker, job_id)
                    }
                    Err(e) => tracing::warn!("Failed to renew lease of job {}: {}", job_id, e),
                }
                if let Err(e) = WorkerRepository::heartbeat(&worker).await {
                    tracing::warn!("Failed to record heartbeat of {}: {}", worker, e);
                }
            }

            QueueMessage::Heartbeat { worker } => {
                if let Err(e) = WorkerRepository::heartbeat(&worker).await {
                    tracing::warn!("Failed to record heartbeat of {}: {}", worker, e);
                }
            }

            QueueMessage::Reap => {
                state.reap().await;
            }

            QueueMessage::Shutdown => {
                tracing::info!("Shutting down queue dispatcher");
                myself.stop(None);
            }
        }

        Ok(())
    }
}
