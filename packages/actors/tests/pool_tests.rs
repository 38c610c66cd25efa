#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use queue_core::{
    CommandSpec, EventKind, FailureReason, JobEvent, JobId, JobState, JobStatus, WorkerInfo,
    WorkerStatus,
};

use actors::{
    Actor, ProcessRunner, QueueActor, QueueActorState, QueueMessage, SupervisorMessage,
    concurrency, start_pool, terminate_busy_workers,
};
use db::EventBroadcaster;
use db::repositories::{JobRepository, WorkerRepository};

use common::{fast_pool, job, wait_until};

const WAIT: Duration = Duration::from_secs(15);

/// Collect events until `done` returns true for the collected list.
async fn collect_events(
    subscription: &mut db::Subscription<JobEvent>,
    mut done: impl FnMut(&[JobEvent]) -> bool,
) -> Result<Vec<JobEvent>, Box<dyn Error>> {
    let mut events = Vec::new();
    while !done(&events) {
        let event = tokio::time::timeout(WAIT, subscription.next())
            .await?
            .ok_or("event stream closed")??;
        events.push(event);
    }
    Ok(events)
}

fn terminal_count(events: &[JobEvent]) -> usize {
    events
        .iter()
        .filter(|e| e.kind() != EventKind::JobStart)
        .count()
}

#[test]
fn test_pool_runs_jobs_and_publishes_events() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let mut events = EventBroadcaster::events().subscribe().await?;

        let pool = start_pool(fast_pool(2), Arc::new(ProcessRunner)).await?;
        assert_eq!(pool.workers().await?.len(), 2);
        assert_eq!(WorkerRepository::list().await?.len(), 2);

        let jobs = JobRepository::enqueue_batch(vec![
            job("ok", CommandSpec::new("true")),
            job("fails", CommandSpec::new("sh").args(["-c", "exit 7"])),
        ])
        .await?;

        let received = collect_events(&mut events, |e| terminal_count(e) == 2).await?;

        let mut kinds: HashMap<JobId, Vec<EventKind>> = HashMap::new();
        for event in &received {
            kinds.entry(event.job_id()).or_default().push(event.kind());
        }
        assert_eq!(kinds[&jobs[0].id], [EventKind::JobStart, EventKind::JobCompleted]);
        assert_eq!(kinds[&jobs[1].id], [EventKind::JobStart, EventKind::JobFailed]);

        let failed = JobRepository::get(jobs[1].id).await?;
        assert!(matches!(
            failed.status,
            JobStatus::Failed { reason: FailureReason::Exited { code: Some(7) }, .. }
        ));
        assert_eq!(JobRepository::get(jobs[0].id).await?.state(), JobState::Completed);

        assert!(wait_until(WAIT, || async {
            matches!(WorkerRepository::list_busy().await, Ok(busy) if busy.is_empty())
        })
        .await);

        pool.shutdown().await?;
        assert!(WorkerRepository::list().await?.is_empty());
        Ok(())
    })
}

#[test]
fn test_each_job_runs_once() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let mut events = EventBroadcaster::events().subscribe().await?;

        let first = start_pool(fast_pool(3), Arc::new(ProcessRunner)).await?;
        let second = start_pool(
            fast_pool(3).with_name_prefix("second"),
            Arc::new(ProcessRunner),
        )
        .await?;

        let specs = (0..15)
            .map(|i| job(&format!("job-{}", i), CommandSpec::new("true")))
            .collect();
        let jobs = JobRepository::enqueue_batch(specs).await?;

        let received = collect_events(&mut events, |e| terminal_count(e) == jobs.len()).await?;

        let mut starts: HashMap<JobId, usize> = HashMap::new();
        for event in &received {
            if let JobEvent::JobStart { job_id, .. } = event {
                *starts.entry(*job_id).or_default() += 1;
            }
        }
        assert_eq!(starts.len(), jobs.len());
        assert!(starts.values().all(|&n| n == 1));

        let stats = JobRepository::stats().await?;
        assert_eq!(stats.completed, 15);
        assert_eq!(stats.pending, 0);

        first.shutdown().await?;
        second.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_terminate_busy_workers() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let mut events = EventBroadcaster::events().subscribe().await?;

        let pool = start_pool(fast_pool(2), Arc::new(ProcessRunner)).await?;

        let sleep = || CommandSpec::new("sleep").arg("30");
        let jobs = JobRepository::enqueue_batch(vec![
            job("long-1", sleep()),
            job("long-2", sleep()),
            job("long-3", sleep()),
        ])
        .await?;

        collect_events(&mut events, |e| e.len() == 2).await?;
        assert!(wait_until(WAIT, || async {
            matches!(WorkerRepository::list_busy().await, Ok(busy) if busy.len() == 2)
        })
        .await);

        let drained = JobRepository::drain().await?;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id, jobs[2].id);

        let terminated = terminate_busy_workers().await?;
        assert_eq!(terminated.len(), 2);

        let received = collect_events(&mut events, |e| e.len() == 2).await?;
        for event in &received {
            assert!(matches!(
                event,
                JobEvent::JobFailed { reason: FailureReason::Terminated, .. }
            ));
        }

        let stats = JobRepository::stats().await?;
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.active(), 0);

        pool.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_expired_lease_is_reaped() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let mut events = EventBroadcaster::events().subscribe().await?;

        // A job claimed by a worker that died without reporting.
        let orphan = JobRepository::enqueue_batch(vec![job("orphan", CommandSpec::new("true"))])
            .await?
            .remove(0);
        JobRepository::claim_next("gone", Duration::from_millis(10)).await?;

        let pool = start_pool(fast_pool(1), Arc::new(ProcessRunner)).await?;

        let received = collect_events(&mut events, |e| !e.is_empty()).await?;
        assert_eq!(received[0].job_id(), orphan.id);
        assert!(matches!(
            received[0],
            JobEvent::JobFailed { reason: FailureReason::LeaseExpired, .. }
        ));

        pool.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_shutdown_fails_running_job() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let mut events = EventBroadcaster::events().subscribe().await?;

        let pool = start_pool(fast_pool(1), Arc::new(ProcessRunner)).await?;
        let running = JobRepository::enqueue_batch(vec![job("long", CommandSpec::new("sleep").arg("30"))])
            .await?
            .remove(0);
        collect_events(&mut events, |e| !e.is_empty()).await?;

        tokio::time::timeout(WAIT, pool.shutdown()).await??;

        let job = JobRepository::get(running.id).await?;
        assert!(matches!(
            job.status,
            JobStatus::Failed { reason: FailureReason::Terminated, .. }
        ));
        assert!(WorkerRepository::list().await?.is_empty());
        Ok(())
    })
}

#[test]
fn test_undelivered_claim_fails_job() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let mut events = EventBroadcaster::events().subscribe().await?;

        WorkerRepository::register(WorkerInfo::new("impatient", "host-a", 1)).await?;
        let queued = JobRepository::enqueue_batch(vec![job("lost", CommandSpec::new("true"))])
            .await?
            .remove(0);

        let (dispatcher, handle) = Actor::spawn(
            None,
            QueueActor,
            QueueActorState::new(Duration::from_secs(60), Duration::from_secs(180)),
        )
        .await?;

        // the claiming worker stopped waiting before the answer arrived
        let (reply, waiting) = concurrency::oneshot();
        drop(waiting);
        dispatcher
            .send_message(QueueMessage::Claim {
                worker: "impatient".to_string(),
                reply: reply.into(),
            })
            .map_err(|e| e.to_string())?;

        let received = collect_events(&mut events, |e| terminal_count(e) == 1).await?;
        let kinds: Vec<_> = received.iter().map(JobEvent::kind).collect();
        assert_eq!(kinds, [EventKind::JobStart, EventKind::JobFailed]);
        assert!(received.iter().all(|e| e.job_id() == queued.id));

        let job = JobRepository::get(queued.id).await?;
        assert!(matches!(
            job.status,
            JobStatus::Failed { reason: FailureReason::Undelivered, .. }
        ));
        let worker = WorkerRepository::get("impatient").await?.ok_or("missing worker")?;
        assert_eq!(worker.status, WorkerStatus::Idle);

        dispatcher
            .send_message(QueueMessage::Shutdown)
            .map_err(|e| e.to_string())?;
        handle.await?;
        WorkerRepository::remove("impatient").await?;
        Ok(())
    })
}

#[test]
fn test_terminate_survives_control_resubscribe() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let mut events = EventBroadcaster::events().subscribe().await?;

        let pool = start_pool(fast_pool(1), Arc::new(ProcessRunner)).await?;
        let running = JobRepository::enqueue_batch(vec![job("long", CommandSpec::new("sleep").arg("30"))])
            .await?
            .remove(0);
        collect_events(&mut events, |e| !e.is_empty()).await?;

        // drop the current subscription; the supervisor subscribes again
        pool.supervisor()
            .send_message(SupervisorMessage::ControlClosed)
            .map_err(|e| e.to_string())?;
        // answered only after the resubscribe was handled
        assert_eq!(pool.workers().await?.len(), 1);

        let terminated = terminate_busy_workers().await?;
        assert_eq!(terminated.len(), 1);

        let received = collect_events(&mut events, |e| !e.is_empty()).await?;
        assert_eq!(received[0].job_id(), running.id);
        assert!(matches!(
            received[0],
            JobEvent::JobFailed { reason: FailureReason::Terminated, .. }
        ));

        pool.shutdown().await?;
        Ok(())
    })
}
