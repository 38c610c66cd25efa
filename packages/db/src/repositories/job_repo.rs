//! Job repository: the pending queue and the job registry.
//!
//! Every state change is a compare-and-swap: the `UPDATE` only matches when
//! the row is still in the state the transition starts from. Whoever loses
//! the race gets no row back and must treat the transition as not having
//! happened.

use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{
    CommandSpec, FailureReason, Job, JobId, JobSpec, JobState, JobStatus, OutputFile, QueueStats,
};
use serde::{Deserialize, Serialize};

use crate::{DbError, get_db, now_ms};

/// How many queued rows a claim attempt looks at before re-reading.
const CLAIM_WINDOW: usize = 8;
/// How many times a claim re-reads the queue after losing every race.
const CLAIM_ATTEMPTS: usize = 16;

/// Repository for job persistence operations.
pub struct JobRepository;

/// Internal record type for SurrealDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRecord {
    job_id: JobId,
    command: CommandSpec,
    output_file: OutputFile,
    status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lease_expires_ms: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    updated_ms: i64,
}

impl From<Job> for JobRecord {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            command: job.command,
            output_file: job.output_file,
            status: job.status,
            lease_expires_ms: None,
            updated_ms: job.updated_at.timestamp_millis(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

impl From<JobRecord> for Job {
    fn from(record: JobRecord) -> Self {
        Job {
            id: record.job_id,
            command: record.command,
            output_file: record.output_file,
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

fn into_jobs(records: Vec<JobRecord>) -> Vec<Job> {
    records.into_iter().map(Job::from).collect()
}

fn lease_deadline(lease: Duration) -> i64 {
    now_ms() + i64::try_from(lease.as_millis()).unwrap_or(i64::MAX / 2)
}

impl JobRepository {
    /// Enqueue a batch of jobs atomically.
    ///
    /// All rows are written by one `INSERT` statement, so concurrent readers
    /// see either the whole batch or none of it. Jobs are returned in the
    /// order of `specs`.
    pub async fn enqueue_batch(specs: Vec<JobSpec>) -> Result<Vec<Job>, DbError> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }

        let db = get_db()?;
        let jobs: Vec<Job> = specs.into_iter().map(Job::new).collect();
        let records: Vec<JobRecord> = jobs.iter().cloned().map(JobRecord::from).collect();

        db.query("INSERT INTO job $records RETURN NONE")
            .bind(("records", records))
            .await?
            .check()?;

        tracing::info!("Enqueued batch of {} jobs", jobs.len());
        Ok(jobs)
    }

    /// Get a job by ID.
    pub async fn get(id: JobId) -> Result<Job, DbError> {
        let db = get_db()?;

        let mut response = db
            .query("SELECT * FROM job WHERE job_id = $job_id LIMIT 1")
            .bind(("job_id", id))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        records
            .into_iter()
            .next()
            .map(Job::from)
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    /// List jobs in one state, oldest first.
    pub async fn list_by_state(state: JobState) -> Result<Vec<Job>, DbError> {
        let db = get_db()?;

        let mut response = db
            .query("SELECT * FROM job WHERE status.state = $state ORDER BY job_id ASC")
            .bind(("state", state))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        Ok(into_jobs(records))
    }

    /// Jobs waiting for a worker, in FIFO order.
    pub async fn list_pending() -> Result<Vec<Job>, DbError> {
        Self::list_by_state(JobState::Queued).await
    }

    /// Jobs a worker is currently executing.
    pub async fn list_in_flight() -> Result<Vec<Job>, DbError> {
        Self::list_by_state(JobState::Started).await
    }

    /// Pending followed by in-flight jobs: everything that is not finished.
    pub async fn list_active() -> Result<Vec<Job>, DbError> {
        let mut jobs = Self::list_pending().await?;
        jobs.extend(Self::list_in_flight().await?);
        Ok(jobs)
    }

    /// Claim the oldest queued job for `worker`.
    ///
    /// The claim moves the job to `Started` and records a lease that the
    /// worker must renew before it runs out. Returns `None` when the queue
    /// is empty.
    pub async fn claim_next(worker: &str, lease: Duration) -> Result<Option<Job>, DbError> {
        let db = get_db()?;

        for _ in 0..CLAIM_ATTEMPTS {
            let mut response = db
                .query("SELECT * FROM job WHERE status.state = $state ORDER BY job_id ASC LIMIT $limit")
                .bind(("state", JobState::Queued))
                .bind(("limit", CLAIM_WINDOW as i64))
                .await?;
            let candidates: Vec<JobRecord> = response.take(0)?;

            if candidates.is_empty() {
                return Ok(None);
            }

            for record in candidates {
                let mut job = Job::from(record);
                job.start(worker, Utc::now())?;

                match Self::try_claim(&job, lease).await {
                    Ok(Some(claimed)) => {
                        tracing::debug!("Worker {} claimed job {}", worker, claimed.id);
                        return Ok(Some(claimed));
                    }
                    Ok(None) => continue,
                    Err(e) if e.is_retryable() => continue,
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(None)
    }

    async fn try_claim(job: &Job, lease: Duration) -> Result<Option<Job>, DbError> {
        let db = get_db()?;

        let mut response = db
            .query(
                r#"
                UPDATE job SET
                    status = $status,
                    lease_expires_ms = $lease,
                    updated_at = $now,
                    updated_ms = $now_ms
                WHERE job_id = $job_id AND status.state = $expected
                RETURN AFTER
                "#,
            )
            .bind(("status", job.status.clone()))
            .bind(("lease", lease_deadline(lease)))
            .bind(("now", job.updated_at))
            .bind(("now_ms", job.updated_at.timestamp_millis()))
            .bind(("job_id", job.id))
            .bind(("expected", JobState::Queued))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        Ok(records.into_iter().next().map(Job::from))
    }

    /// Extend the lease of a job held by `worker`.
    ///
    /// Returns false when the worker no longer holds the job, for example
    /// because the reaper already failed it.
    pub async fn renew_lease(id: JobId, worker: &str, lease: Duration) -> Result<bool, DbError> {
        let db = get_db()?;

        let mut response = db
            .query(
                r#"
                UPDATE job SET lease_expires_ms = $lease
                WHERE job_id = $job_id AND status.state = $expected AND status.worker = $worker
                RETURN AFTER
                "#,
            )
            .bind(("lease", lease_deadline(lease)))
            .bind(("job_id", id))
            .bind(("expected", JobState::Started))
            .bind(("worker", worker.to_string()))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        Ok(!records.is_empty())
    }

    /// Record the outcome of a job executed by `worker`.
    ///
    /// `Ok(None)` means the report was stale: the job is not (or no longer)
    /// started by this worker, and nothing was changed.
    pub async fn finish(
        id: JobId,
        worker: &str,
        outcome: Result<(), FailureReason>,
    ) -> Result<Option<Job>, DbError> {
        let mut job = Self::get(id).await?;

        if job.state() != JobState::Started || job.status.worker() != Some(worker) {
            tracing::warn!(
                "Ignoring stale report for job {} from {} (state {})",
                id,
                worker,
                job.state()
            );
            return Ok(None);
        }

        let now = Utc::now();
        match outcome {
            Ok(()) => job.complete(now)?,
            Err(reason) => job.fail(reason, now)?,
        }

        Self::store_outcome(&job, worker, None).await
    }

    /// Write a terminal status, guarded on the job still being started by
    /// `worker` (and, for the reaper, on its lease being past `expired_before`).
    async fn store_outcome(
        job: &Job,
        worker: &str,
        expired_before: Option<i64>,
    ) -> Result<Option<Job>, DbError> {
        let db = get_db()?;

        let lease_guard = if expired_before.is_some() {
            "AND lease_expires_ms < $expired_before"
        } else {
            ""
        };
        let query = format!(
            r#"
            UPDATE job SET
                status = $status,
                lease_expires_ms = NONE,
                updated_at = $now,
                updated_ms = $now_ms
            WHERE job_id = $job_id AND status.state = $expected AND status.worker = $worker {}
            RETURN AFTER
            "#,
            lease_guard
        );

        let mut response = db
            .query(query)
            .bind(("status", job.status.clone()))
            .bind(("now", job.updated_at))
            .bind(("now_ms", job.updated_at.timestamp_millis()))
            .bind(("job_id", job.id))
            .bind(("expected", JobState::Started))
            .bind(("worker", worker.to_string()))
            .bind(("expired_before", expired_before.unwrap_or_default()))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        Ok(records.into_iter().next().map(Job::from))
    }

    /// Fail every started job whose lease ran out.
    ///
    /// Returns the jobs this call moved to `Failed`; a job reaped
    /// concurrently by another process is only returned to one caller.
    pub async fn expire_leases() -> Result<Vec<Job>, DbError> {
        let db = get_db()?;
        let cutoff = now_ms();

        let mut response = db
            .query("SELECT * FROM job WHERE status.state = $state AND lease_expires_ms < $cutoff")
            .bind(("state", JobState::Started))
            .bind(("cutoff", cutoff))
            .await?;
        let candidates: Vec<JobRecord> = response.take(0)?;

        let mut expired = Vec::new();
        for record in candidates {
            let mut job = Job::from(record);
            let Some(worker) = job.status.worker().map(str::to_string) else {
                continue;
            };
            job.fail(FailureReason::LeaseExpired, Utc::now())?;

            match Self::store_outcome(&job, &worker, Some(cutoff)).await {
                Ok(Some(failed)) => {
                    tracing::warn!("Job {} lease expired (worker {})", failed.id, worker);
                    expired.push(failed);
                }
                Ok(None) => {}
                Err(e) if e.is_retryable() => {}
                Err(e) => return Err(e),
            }
        }

        Ok(expired)
    }

    /// Remove every queued job in one statement. Started jobs are untouched.
    pub async fn drain() -> Result<Vec<Job>, DbError> {
        let db = get_db()?;

        let mut response = db
            .query("DELETE job WHERE status.state = $state RETURN BEFORE")
            .bind(("state", JobState::Queued))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        let mut jobs = into_jobs(records);
        jobs.sort_by_key(|job| job.id);

        tracing::info!("Drained {} pending jobs", jobs.len());
        Ok(jobs)
    }

    /// Delete finished jobs last updated before `before`.
    pub async fn purge_finished(before: DateTime<Utc>) -> Result<u64, DbError> {
        let db = get_db()?;

        let mut response = db
            .query(
                r#"
                DELETE job
                WHERE status.state IN [$completed, $failed] AND updated_ms < $before
                RETURN BEFORE
                "#,
            )
            .bind(("completed", JobState::Completed))
            .bind(("failed", JobState::Failed))
            .bind(("before", before.timestamp_millis()))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        tracing::info!("Purged {} finished jobs", records.len());
        Ok(records.len() as u64)
    }

    /// Count jobs by state.
    pub async fn stats() -> Result<QueueStats, DbError> {
        let db = get_db()?;

        let mut response = db
            .query("SELECT status.state AS state, count() AS count FROM job GROUP BY state")
            .await?;

        #[derive(Deserialize)]
        struct StateCount {
            state: Option<JobState>,
            count: i64,
        }

        let counts: Vec<StateCount> = response.take(0)?;

        let mut stats = QueueStats::default();
        for StateCount { state, count } in counts {
            let count = u64::try_from(count).unwrap_or(0);
            match state {
                Some(JobState::Queued) => stats.pending = count,
                Some(JobState::Started) => stats.started = count,
                Some(JobState::Completed) => stats.completed = count,
                Some(JobState::Failed) => stats.failed = count,
                None => {}
            }
        }

        Ok(stats)
    }
}
