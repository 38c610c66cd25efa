use std::error::Error;
use std::future::Future;
use std::sync::LazyLock;

use tokio::runtime::Runtime;
use tokio::sync::{Mutex, MutexGuard};

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
    reset_db().await?;
    Ok(guard)
}

pub async fn reset_db() -> Result<(), DbError> {
    let db_conn = db::get_db()?;
    db_conn.query("DELETE job; DELETE worker;").await?.check()?;
    Ok(())
}

pub fn spec(name: &str) -> JobSpec {
    JobSpec {
        command: CommandSpec::new("true").arg(name),
        output_file: OutputFile {
            name: name.to_string(),
            url: format!("http://localhost/files/output/{}", name),
        },
    }
}
