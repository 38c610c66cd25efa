//! Supervisor actor owning one worker pool.

use std::collections::HashMap;
use std::sync::Arc;

use db::ControlChannel;
use db::repositories::WorkerRepository;
use futures_util::StreamExt;
use queue_core::{WorkerCommand, WorkerInfo};
use ractor::{Actor, ActorCell, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::task::JoinHandle;

use crate::config::PoolConfig;
use crate::messages::{ActorError, QueueMessage, SupervisorMessage, WorkerMessage};
use crate::queue_actor::{QueueActor, QueueActorState};
use crate::runner::CommandRunner;
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// State for the supervisor actor.
pub struct SupervisorState {
    config: PoolConfig,
    runner: Arc<dyn CommandRunner>,
    /// Queue dispatcher shared by all workers of the pool.
    queue: ActorRef<QueueMessage>,
    /// Worker actors by name.
    workers: HashMap<String, ActorRef<WorkerMessage>>,
    /// Task forwarding the control channel into this actor.
    control: JoinHandle<()>,
    /// Housekeeping tick task.
    ticker: JoinHandle<()>,
    shutting_down: bool,
}

impl SupervisorState {
    /// Stop the workers; the dispatcher and the supervisor follow once the
    /// last worker has stopped.
    fn begin_shutdown(&mut self) -> Result<(), ActorProcessingErr> {
        if self.shutting_down {
            return Ok(());
        }
        tracing::info!("Shutting down worker pool");
        self.shutting_down = true;
        self.control.abort();
        self.ticker.abort();

        if self.workers.is_empty() {
            self.queue.send_message(QueueMessage::Shutdown)?;
        }
        for worker in self.workers.values() {
            let _ = worker.send_message(WorkerMessage::Shutdown);
        }
        Ok(())
    }

    fn worker_name_of(&self, cell: &ActorCell) -> Option<String> {
        self.workers
            .iter()
            .find(|(_, worker)| worker.get_id() == cell.get_id())
            .map(|(name, _)| name.clone())
    }
}

/// Arguments for the supervisor actor.
pub struct PoolArgs {
    pub config: PoolConfig,
    pub runner: Arc<dyn CommandRunner>,
}

/// Subscribe to the control channel and forward its commands to the
/// supervisor. When the stream ends the supervisor is told to resubscribe.
async fn forward_control(
    supervisor: ActorRef<SupervisorMessage>,
) -> Result<JoinHandle<()>, ActorProcessingErr> {
    let mut commands = ControlChannel::control().subscribe().await?;

    Ok(tokio::spawn(async move {
        while let Some(item) = commands.next().await {
            match item {
                Ok(command) => {
                    if supervisor
                        .send_message(SupervisorMessage::Command(command))
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => tracing::warn!("Control channel error: {}", e),
            }
        }
        tracing::warn!("Control channel subscription ended");
        let _ = supervisor.send_message(SupervisorMessage::ControlClosed);
    }))
}

async fn spawn_worker(
    supervisor: ActorCell,
    config: &PoolConfig,
    runner: Arc<dyn CommandRunner>,
    queue: ActorRef<QueueMessage>,
    name: String,
) -> Result<ActorRef<WorkerMessage>, ActorProcessingErr> {
    let args = WorkerArgs {
        name: name.clone(),
        host: config.host.clone(),
        queue,
        runner,
        poll_interval: config.poll_interval,
        heartbeat_interval: config.heartbeat_interval,
    };

    let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, supervisor)
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker {}: {}", name, e)))?;

    Ok(worker)
}

/// Supervisor actor that manages the dispatcher and workers of a pool.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = PoolArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let PoolArgs { config, runner } = args;
        tracing::info!("Starting worker pool with {} workers", config.concurrency);

        let (queue, _handle) = Actor::spawn_linked(
            None,
            QueueActor,
            QueueActorState::new(config.lease, config.stale_after),
            myself.get_cell(),
        )
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn dispatcher: {}", e)))?;

        // Subscribe before any worker exists, so no command addressed to
        // this pool can be missed.
        let control = forward_control(myself.clone()).await?;

        let mut workers = HashMap::new();
        for index in 0..config.concurrency {
            let name = config.worker_name(index);
            let worker = spawn_worker(
                myself.get_cell(),
                &config,
                runner.clone(),
                queue.clone(),
                name.clone(),
            )
            .await?;
            workers.insert(name, worker);
        }

        // Start periodic tick
        let myself_clone = myself.clone();
        let reap_interval = config.reap_interval;
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(reap_interval);
            loop {
                interval.tick().await;
                if myself_clone.send_message(SupervisorMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(SupervisorState {
            config,
            runner,
            queue,
            workers,
            control,
            ticker,
            shutting_down: false,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.control.abort();
        state.ticker.abort();
        tracing::info!("Worker pool stopped");
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Command(WorkerCommand::Terminate { worker }) => {
                if let Some(actor) = state.workers.get(&worker) {
                    tracing::info!("Terminate requested for worker {}", worker);
                    actor.send_message(WorkerMessage::Terminate)?;
                }
            }

            SupervisorMessage::ListWorkers { reply } => {
                let mut names: Vec<String> = state.workers.keys().cloned().collect();
                names.sort();
                let _ = reply.send(names);
            }

            SupervisorMessage::ControlClosed => {
                if state.shutting_down {
                    return Ok(());
                }
                state.control.abort();
                match forward_control(myself.clone()).await {
                    Ok(control) => {
                        tracing::info!("Resubscribed to the control channel");
                        state.control = control;
                    }
                    Err(e) => {
                        // Without the control channel the pool cannot be stopped remotely.
                        tracing::error!("Cannot resubscribe to the control channel: {}", e);
                        state.begin_shutdown()?;
                    }
                }
            }

            SupervisorMessage::Shutdown => {
                state.begin_shutdown()?;
            }

            SupervisorMessage::Tick => {
                if !state.shutting_down {
                    state.queue.send_message(QueueMessage::Reap)?;
                }
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (cell, failure) = match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => (cell, reason),
            SupervisionEvent::ActorFailed(cell, err) => (cell, Some(err.to_string())),
            _ => return Ok(()),
        };

        if cell.get_id() == state.queue.get_id() {
            if !state.shutting_down {
                tracing::error!("Queue dispatcher stopped unexpectedly: {:?}", failure);
                for worker in state.workers.values() {
                    worker.stop(None);
                }
            }
            myself.stop(failure);
            return Ok(());
        }

        let Some(name) = state.worker_name_of(&cell) else {
            return Ok(());
        };
        state.workers.remove(&name);

        if state.shutting_down {
            tracing::info!("Worker {} stopped", name);
            if state.workers.is_empty() {
                // Every report is already queued ahead of this message.
                state.queue.send_message(QueueMessage::Shutdown)?;
            }
            return Ok(());
        }

        tracing::warn!("Worker {} terminated: {:?}, restarting", name, failure);
        let worker = spawn_worker(
            myself.get_cell(),
            &state.config,
            state.runner.clone(),
            state.queue.clone(),
            name.clone(),
        )
        .await?;
        state.workers.insert(name, worker);

        Ok(())
    }
}

/// A running worker pool.
pub struct WorkerPool {
    supervisor: ActorRef<SupervisorMessage>,
    handle: JoinHandle<()>,
}

impl WorkerPool {
    pub fn supervisor(&self) -> &ActorRef<SupervisorMessage> {
        &self.supervisor
    }

    /// Names of the workers of this pool.
    pub async fn workers(&self) -> Result<Vec<String>, ActorError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.supervisor
            .send_message(SupervisorMessage::ListWorkers { reply: tx.into() })
            .map_err(|e| ActorError::Actor(e.to_string()))?;
        rx.await.map_err(|e| ActorError::Actor(e.to_string()))
    }

    /// Stop the pool. Running jobs are terminated and reported as failed
    /// before this returns.
    pub async fn shutdown(self) -> Result<(), ActorError> {
        self.supervisor
            .send_message(SupervisorMessage::Shutdown)
            .map_err(|e| ActorError::Actor(e.to_string()))?;
        self.handle
            .await
            .map_err(|e| ActorError::Actor(e.to_string()))
    }

    /// Wait until the pool stops on its own. Do not call `shutdown` after
    /// this returned.
    pub async fn wait(&mut self) -> Result<(), ActorError> {
        (&mut self.handle)
            .await
            .map_err(|e| ActorError::Actor(e.to_string()))
    }
}

/// Start a worker pool: a dispatcher, `config.concurrency` workers and the
/// control channel subscription. The database must be initialized.
pub async fn start_pool(
    config: PoolConfig,
    runner: Arc<dyn CommandRunner>,
) -> Result<WorkerPool, ActorError> {
    let (supervisor, handle) = Actor::spawn(None, Supervisor, PoolArgs { config, runner }).await?;

    Ok(WorkerPool { supervisor, handle })
}

/// Ask every busy worker, in any process, to terminate its current job.
///
/// Returns the workers that were busy when the command was sent. Each
/// terminated job is reported as failed by its worker.
pub async fn terminate_busy_workers() -> Result<Vec<WorkerInfo>, ActorError> {
    let busy = WorkerRepository::list_busy().await?;
    let control = ControlChannel::control();

    for worker in &busy {
        control
            .publish(WorkerCommand::Terminate {
                worker: worker.name.clone(),
            })
            .await?;
    }

    if !busy.is_empty() {
        tracing::info!("Sent terminate to {} busy workers", busy.len());
    }
    Ok(busy)
}
