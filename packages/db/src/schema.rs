//! Database schema definitions using SurrealQL.

use crate::{DbError, get_db};

/// Initialize the database schema.
///
/// This creates all necessary tables and indexes. Every statement is
/// idempotent, so concurrent processes may all run it at startup.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(WORKER_SCHEMA).await?.check()?;
    db.query(CHANNEL_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema: the pending queue and the registry in one table.
const JOB_SCHEMA: &str = r#"
-- Rows carry nested status/command objects, so the table stays schemaless
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS job_id ON job TYPE string;
DEFINE FIELD IF NOT EXISTS updated_ms ON job TYPE int;
DEFINE FIELD IF NOT EXISTS lease_expires_ms ON job TYPE option<int>;

-- Ids are monotonic ULIDs, so ordering by job_id is FIFO order
DEFINE INDEX IF NOT EXISTS job_id_unique ON job FIELDS job_id UNIQUE;
DEFINE INDEX IF NOT EXISTS job_state ON job FIELDS status.state;
DEFINE INDEX IF NOT EXISTS job_state_lease ON job FIELDS status.state, lease_expires_ms;
"#;

/// Worker registry schema.
const WORKER_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS worker SCHEMALESS;

DEFINE FIELD IF NOT EXISTS name ON worker TYPE string;
DEFINE FIELD IF NOT EXISTS status ON worker TYPE string DEFAULT "idle";
DEFINE FIELD IF NOT EXISTS heartbeat_ms ON worker TYPE int;

DEFINE INDEX IF NOT EXISTS worker_name ON worker FIELDS name UNIQUE;
DEFINE INDEX IF NOT EXISTS worker_status ON worker FIELDS status;
"#;

/// Live channel tables. Rows only exist for the instant between publish
/// and delete; subscribers see them through LIVE SELECT.
const CHANNEL_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_event SCHEMALESS;
DEFINE TABLE IF NOT EXISTS worker_command SCHEMALESS;
"#;
