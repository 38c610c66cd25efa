use std::error::Error;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Runtime;
use tokio::sync::{Mutex, MutexGuard};

use actors::PoolConfig;
use api::{FaceSwapConfig, MediaDir, MediaStore, Orchestrator};
use db::{DbConfig, DbError};
use storage::{StorageConfig, StorageError};

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

/// A memory media store holding `a.jpg` as source and `b.jpg`, `c.jpg` as
/// targets.
pub async fn seeded_media() -> Result<MediaStore, StorageError> {
    let media = MediaStore::new(
        StorageConfig::memory().with_public_base_url("https://faces.example"),
    )
    .await?;
    media
        .put_bytes(MediaDir::Source, "a.jpg", Bytes::from("a"))
        .await?;
    for target in ["b.jpg", "c.jpg"] {
        media
            .put_bytes(MediaDir::Target, target, Bytes::from("t"))
            .await?;
    }
    Ok(media)
}

pub async fn orchestrator(faceswap: FaceSwapConfig) -> Result<Orchestrator, StorageError> {
    Ok(Orchestrator::new(seeded_media().await?, faceswap))
}

pub fn fast_pool(concurrency: usize) -> PoolConfig {
    PoolConfig::default()
        .with_concurrency(concurrency)
        .with_poll_interval(Duration::from_millis(20))
        .with_lease(Duration::from_secs(5))
        .with_heartbeat_interval(Duration::from_secs(1))
        .with_reap_interval(Duration::from_secs(1))
        .with_name_prefix("api-test")
}
