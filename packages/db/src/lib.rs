//! SurrealDB-backed coordination store for the job queue.
//!
//! One database holds everything the service processes share:
//! - the `job` table, which is both the pending queue and the job registry
//! - the `worker` table, where every worker registers itself
//! - live channels (`job_event`, `worker_command`) for fan-out notifications
//!
//! # Features
//!
//! - `memory` (default): in-memory engine for tests and single-process runs
//! - `remote` (default): `ws://` endpoints, shared by several processes
//! - `rocksdb`: RocksDB for persistent file-based storage

mod channel;
mod connection;
mod schema;
pub mod repositories;

pub use channel::{ControlChannel, EventBroadcaster, LiveChannel, Subscription};
pub use connection::{Database, DbConfig, DbError, get_db, init_db, try_get_db};
pub use schema::init_schema;

/// Initialize the database with the given configuration.
///
/// This should be called once at application startup.
pub async fn init(config: DbConfig) -> Result<(), DbError> {
    init_db(config).await?;
    init_schema().await?;
    Ok(())
}

/// Milliseconds since the Unix epoch, the unit used for lease and
/// heartbeat comparisons inside queries.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
