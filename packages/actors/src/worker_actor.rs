//! Worker actor for executing jobs.

use std::sync::Arc;
use std::time::Duration;

use db::repositories::WorkerRepository;
use queue_core::{Job, JobId, WorkerInfo};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::messages::{QueueMessage, WorkerMessage};
use crate::runner::CommandRunner;

/// The job a worker is executing.
struct RunningJob {
    job_id: JobId,
    /// Dropped once used, so a second terminate is a no-op.
    kill: Option<oneshot::Sender<()>>,
}

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker name.
    pub name: String,
    /// Queue dispatcher reference.
    queue: ActorRef<QueueMessage>,
    runner: Arc<dyn CommandRunner>,
    /// Current job being processed.
    current: Option<RunningJob>,
    heartbeat_interval: Duration,
    last_heartbeat: Instant,
    /// Set by `Shutdown`; the worker stops once its job has been reported.
    stopping: bool,
}

impl WorkerActorState {
    /// Check if the worker is idle.
    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    fn heartbeat_due(&self) -> bool {
        self.last_heartbeat.elapsed() >= self.heartbeat_interval
    }

    fn start(&mut self, myself: &ActorRef<WorkerMessage>, job: Job) {
        let (kill_tx, kill_rx) = oneshot::channel();
        let job_id = job.id;
        let run = self.runner.run(job_id, job.command, kill_rx);

        let myself = myself.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let outcome = run.await;
            if myself
                .send_message(WorkerMessage::Finished { job_id, outcome })
                .is_err()
            {
                tracing::error!("Worker {} stopped before job {} finished", name, job_id);
            }
        });

        self.current = Some(RunningJob {
            job_id,
            kill: Some(kill_tx),
        });
        self.last_heartbeat = Instant::now();
    }

    fn terminate(&mut self) {
        if let Some(running) = self.current.as_mut()
            && let Some(kill) = running.kill.take()
        {
            tracing::info!("Worker {} terminating job {}", self.name, running.job_id);
            let _ = kill.send(());
        }
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub name: String,
    pub host: String,
    pub queue: ActorRef<QueueMessage>,
    pub runner: Arc<dyn CommandRunner>,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

/// Worker actor that executes jobs one at a time.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.name);

        WorkerRepository::register(WorkerInfo::new(
            args.name.clone(),
            args.host,
            std::process::id(),
        ))
        .await?;

        // Start the work loop
        let myself_clone = myself.clone();
        let poll_interval = args.poll_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                if myself_clone.send_message(WorkerMessage::Heartbeat).is_err() {
                    break;
                }
            }
        });

        Ok(WorkerActorState {
            name: args.name,
            queue: args.queue,
            runner: args.runner,
            current: None,
            heartbeat_interval: args.heartbeat_interval,
            last_heartbeat: Instant::now(),
            stopping: false,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.terminate();
        if let Err(e) = WorkerRepository::remove(&state.name).await {
            tracing::warn!("Failed to unregister worker {}: {}", state.name, e);
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Heartbeat => {
                if state.stopping {
                    return Ok(());
                }

                if let Some(running) = &state.current {
                    if state.heartbeat_due() {
                        state.queue.send_message(QueueMessage::RenewLease {
                            job_id: running.job_id,
                            worker: state.name.clone(),
                        })?;
                        state.last_heartbeat = Instant::now();
                    }
                    return Ok(());
                }

                // No timeout: a claim made after the worker gave up would
                // leave the job started with nobody running it.
                let result = ractor::rpc::call(
                    &state.queue,
                    |reply| QueueMessage::Claim {
                        worker: state.name.clone(),
                        reply,
                    },
                    None,
                )
                .await;

                match result {
                    Ok(ractor::rpc::CallResult::Success(Some(job))) => {
                        state.start(&myself, job);
                    }
                    Ok(ractor::rpc::CallResult::Success(None)) => {
                        if state.heartbeat_due() {
                            state.queue.send_message(QueueMessage::Heartbeat {
                                worker: state.name.clone(),
                            })?;
                            state.last_heartbeat = Instant::now();
                        }
                    }
                    Ok(_) => {
                        tracing::warn!("Worker {} got no answer to its claim", state.name);
                    }
                    Err(e) => {
                        return Err(ActorProcessingErr::from(format!(
                            "Queue dispatcher unavailable: {}",
                            e
                        )));
                    }
                }
            }

            WorkerMessage::Finished { job_id, outcome } => {
                if state.current.as_ref().map(|r| r.job_id) != Some(job_id) {
                    tracing::warn!("Worker {} got a result for unknown job {}", state.name, job_id);
                    return Ok(());
                }
                state.current = None;

                state.queue.send_message(QueueMessage::Report {
                    job_id,
                    worker: state.name.clone(),
                    outcome,
                })?;

                if state.stopping {
                    myself.stop(None);
                }
            }

            WorkerMessage::Terminate => {
                state.terminate();
            }

            WorkerMessage::IsIdle { reply } => {
                let _ = reply.send(state.is_idle());
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.name);
                state.stopping = true;
                if state.is_idle() {
                    myself.stop(None);
                } else {
                    state.terminate();
                }
            }
        }

        Ok(())
    }
}
