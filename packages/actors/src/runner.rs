//! Execution of job commands.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use queue_core::{CommandSpec, FailureReason, JobId};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;

/// Outcome of one command run: `Ok` when it exited successfully.
pub type RunOutcome = Result<(), FailureReason>;

/// Future type for async command runs.
pub type RunFuture = Pin<Box<dyn Future<Output = RunOutcome> + Send>>;

/// Runs the command of a claimed job.
///
/// `kill` resolves when the job must be stopped early; the run must then
/// end promptly with [`FailureReason::Terminated`].
pub trait CommandRunner: Send + Sync + 'static {
    fn run(&self, job_id: JobId, command: CommandSpec, kill: oneshot::Receiver<()>) -> RunFuture;
}

/// Runs commands as child processes of the worker.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, job_id: JobId, command: CommandSpec, kill: oneshot::Receiver<()>) -> RunFuture {
        Box::pin(run_process(job_id, command, kill))
    }
}

async fn run_process(job_id: JobId, command: CommandSpec, kill: oneshot::Receiver<()>) -> RunOutcome {
    tracing::info!(job_id = %job_id, command = %command, "Running job command");

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Failed to start job command");
            FailureReason::SpawnFailed {
                message: e.to_string(),
            }
        })?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(job_id, "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(job_id, "stderr", stderr));
    }

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => {
                tracing::info!(job_id = %job_id, "Job command succeeded");
                Ok(())
            }
            Ok(status) => {
                tracing::warn!(job_id = %job_id, exit_code = ?status.code(), "Job command failed");
                Err(FailureReason::Exited { code: status.code() })
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed waiting for job command");
                Err(FailureReason::SpawnFailed { message: e.to_string() })
            }
        },
        Ok(()) = kill => {
            tracing::warn!(job_id = %job_id, "Terminating job command");
            if let Err(e) = child.kill().await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to kill job command");
            }
            Err(FailureReason::Terminated)
        }
    }
}

async fn forward_lines<R>(job_id: JobId, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(job_id = %job_id, stream, "{}", line);
    }
}

/// A runner backed by a closure, for embedding and tests.
pub struct FnRunner<F>
where
    F: Fn(JobId, CommandSpec, oneshot::Receiver<()>) -> RunFuture + Send + Sync + 'static,
{
    run: F,
}

impl<F> FnRunner<F>
where
    F: Fn(JobId, CommandSpec, oneshot::Receiver<()>) -> RunFuture + Send + Sync + 'static,
{
    pub fn new(run: F) -> Self {
        Self { run }
    }
}

impl<F> CommandRunner for FnRunner<F>
where
    F: Fn(JobId, CommandSpec, oneshot::Receiver<()>) -> RunFuture + Send + Sync + 'static,
{
    fn run(&self, job_id: JobId, command: CommandSpec, kill: oneshot::Receiver<()>) -> RunFuture {
        (self.run)(job_id, command, kill)
    }
}
