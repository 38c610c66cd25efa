//! Worker registry repository.

use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{JobId, WorkerInfo, WorkerStatus};
use serde::{Deserialize, Serialize};

use crate::{DbError, get_db, now_ms};

/// Repository for worker registration and liveness.
pub struct WorkerRepository;

/// Internal record type for SurrealDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkerRecord {
    name: String,
    host: String,
    pid: u32,
    status: WorkerStatus,
    #[serde(default)]
    current_job: Option<JobId>,
    registered_at: DateTime<Utc>,
    heartbeat_at: DateTime<Utc>,
    heartbeat_ms: i64,
}

impl From<WorkerInfo> for WorkerRecord {
    fn from(info: WorkerInfo) -> Self {
        Self {
            heartbeat_ms: info.heartbeat_at.timestamp_millis(),
            name: info.name,
            host: info.host,
            pid: info.pid,
            status: info.status,
            current_job: info.current_job,
            registered_at: info.registered_at,
            heartbeat_at: info.heartbeat_at,
        }
    }
}

impl From<WorkerRecord> for WorkerInfo {
    fn from(record: WorkerRecord) -> Self {
        WorkerInfo {
            name: record.name,
            host: record.host,
            pid: record.pid,
            status: record.status,
            current_job: record.current_job,
            registered_at: record.registered_at,
            heartbeat_at: record.heartbeat_at,
        }
    }
}

impl WorkerRepository {
    /// Register a worker, replacing any previous row with the same name.
    pub async fn register(info: WorkerInfo) -> Result<WorkerInfo, DbError> {
        let db = get_db()?;
        let name = info.name.clone();

        let mut response = db
            .query("UPSERT type::thing('worker', $name) CONTENT $record RETURN AFTER")
            .bind(("name", name.clone()))
            .bind(("record", WorkerRecord::from(info)))
            .await?;
        let records: Vec<WorkerRecord> = response.take(0)?;

        tracing::info!("Registered worker {}", name);

        records
            .into_iter()
            .next()
            .map(WorkerInfo::from)
            .ok_or_else(|| DbError::Query(format!("Failed to register worker {}", name)))
    }

    /// Get a worker by name.
    pub async fn get(name: &str) -> Result<Option<WorkerInfo>, DbError> {
        let db = get_db()?;

        let record: Option<WorkerRecord> = db.select(("worker", name)).await?;
        Ok(record.map(WorkerInfo::from))
    }

    /// Mark a worker as executing `job_id`.
    pub async fn mark_busy(name: &str, job_id: JobId) -> Result<(), DbError> {
        Self::set_status(name, WorkerStatus::Busy, Some(job_id)).await
    }

    /// Mark a worker as waiting for work.
    pub async fn mark_idle(name: &str) -> Result<(), DbError> {
        Self::set_status(name, WorkerStatus::Idle, None).await
    }

    async fn set_status(
        name: &str,
        status: WorkerStatus,
        current_job: Option<JobId>,
    ) -> Result<(), DbError> {
        let db = get_db()?;
        let now = Utc::now();

        db.query(
            r#"
            UPDATE type::thing('worker', $name) SET
                status = $status,
                current_job = $current_job,
                heartbeat_at = $now,
                heartbeat_ms = $now_ms
            "#,
        )
        .bind(("name", name.to_string()))
        .bind(("status", status))
        .bind(("current_job", current_job))
        .bind(("now", now))
        .bind(("now_ms", now.timestamp_millis()))
        .await?
        .check()?;

        tracing::debug!("Worker {} is now {}", name, status);
        Ok(())
    }

    /// Refresh a worker's liveness timestamp.
    pub async fn heartbeat(name: &str) -> Result<(), DbError> {
        let db = get_db()?;
        let now = Utc::now();

        db.query("UPDATE type::thing('worker', $name) SET heartbeat_at = $now, heartbeat_ms = $now_ms")
            .bind(("name", name.to_string()))
            .bind(("now", now))
            .bind(("now_ms", now.timestamp_millis()))
            .await?
            .check()?;

        Ok(())
    }

    /// List all registered workers, ordered by name.
    pub async fn list() -> Result<Vec<WorkerInfo>, DbError> {
        let db = get_db()?;

        let mut response = db.query("SELECT * FROM worker ORDER BY name ASC").await?;
        let records: Vec<WorkerRecord> = response.take(0)?;

        Ok(records.into_iter().map(WorkerInfo::from).collect())
    }

    /// List workers currently executing a job.
    pub async fn list_busy() -> Result<Vec<WorkerInfo>, DbError> {
        let db = get_db()?;

        let mut response = db
            .query("SELECT * FROM worker WHERE status = $status ORDER BY name ASC")
            .bind(("status", WorkerStatus::Busy))
            .await?;
        let records: Vec<WorkerRecord> = response.take(0)?;

        Ok(records.into_iter().map(WorkerInfo::from).collect())
    }

    /// Remove a worker from the registry.
    pub async fn remove(name: &str) -> Result<(), DbError> {
        let db = get_db()?;

        let _: Option<WorkerRecord> = db.delete(("worker", name)).await?;
        tracing::info!("Unregistered worker {}", name);
        Ok(())
    }

    /// Remove workers that have not sent a heartbeat within `max_age`.
    pub async fn remove_stale(max_age: Duration) -> Result<Vec<WorkerInfo>, DbError> {
        let db = get_db()?;
        let cutoff = now_ms() - i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX / 2);

        let mut response = db
            .query("DELETE worker WHERE heartbeat_ms < $cutoff RETURN BEFORE")
            .bind(("cutoff", cutoff))
            .await?;
        let records: Vec<WorkerRecord> = response.take(0)?;

        for record in &records {
            tracing::warn!("Removed stale worker {}", record.name);
        }

        Ok(records.into_iter().map(WorkerInfo::from).collect())
    }
}
