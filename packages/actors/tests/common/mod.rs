use std::error::Error;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::{Mutex, MutexGuard};

use actors::PoolConfig;
use db::{DbConfig, DbError};
use queue_core::{CommandSpec, JobSpec, OutputFile};

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Shared runtime for every test in the binary. The global database handle
/// keeps its router task on the runtime that opened it, so tests must not
/// each bring their own.
static RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build test runtime")
});

pub fn run<F>(test: F) -> Result<(), Box<dyn Error>>
where
    F: Future<Output = Result<(), Box<dyn Error>>>,
{
    RUNTIME.block_on(test)
}

pub async fn setup_db() -> Result<MutexGuard<'static, ()>, DbError> {
    let guard = TEST_LOCK.lock().await;
    db::init(DbConfig::memory()).await?;
    let db_conn = db::get_db()?;
    db_conn.query("DELETE job; DELETE worker;").await?.check()?;
    Ok(guard)
}

pub fn fast_pool(concurrency: usize) -> PoolConfig {
    PoolConfig::default()
        .with_concurrency(concurrency)
        .with_poll_interval(Duration::from_millis(20))
        .with_lease(Duration::from_secs(5))
        .with_heartbeat_interval(Duration::from_secs(1))
        .with_reap_interval(Duration::from_millis(100))
        .with_name_prefix("test")
}

pub fn job(name: &str, command: CommandSpec) -> JobSpec {
    JobSpec {
        command,
        output_file: OutputFile {
            name: name.to_string(),
            url: format!("http://localhost/files/output/{}", name),
        },
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
