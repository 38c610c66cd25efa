#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;

use actors::{ProcessRunner, start_pool};
use api::{
    ApiError, EventKind, FaceSwapConfig, FailureReason, JobEvent, JobId, JobState, JobStatus,
    MediaDir, SubmitBatchRequest,
};

const WAIT: Duration = Duration::from_secs(15);

async fn next_event(
    subscription: &mut db::Subscription<JobEvent>,
) -> Result<JobEvent, Box<dyn Error>> {
    Ok(tokio::time::timeout(WAIT, subscription.next())
        .await?
        .ok_or("event stream closed")??)
}

fn request(source: &str, targets: &[&str]) -> SubmitBatchRequest {
    SubmitBatchRequest {
        source: source.to_string(),
        targets: targets.iter().map(|t| t.to_string()).collect(),
        extra_options: Vec::new(),
    }
}

#[test]
fn test_submit_and_complete_batch() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let api = common::orchestrator(FaceSwapConfig::program("true")).await?;
        let mut events = api.subscribe().await?;

        let handles = api.submit_batch(request("a.jpg", &["b.jpg", "c.jpg"])).await?;
        assert_eq!(handles.len(), 2);
        assert_ne!(handles[0].job_id, handles[1].job_id);
        assert_ne!(handles[0].output_file.name, handles[1].output_file.name);
        assert!(handles[0].output_file.name.ends_with("_a_b.jpg"));
        assert!(handles[1].output_file.name.ends_with("_a_c.jpg"));
        assert_eq!(
            handles[0].output_file.url,
            format!("https://faces.example/files/output/{}", handles[0].output_file.name)
        );

        let active = api.list_active_jobs().await?;
        assert_eq!(active, handles);

        let job = api.get_job(handles[0].job_id).await?;
        assert_eq!(job.command.program, "true");
        assert!(job.command.args.contains(&"--headless".to_string()));

        let pool = start_pool(common::fast_pool(2), Arc::new(ProcessRunner)).await?;

        let mut seen: HashMap<JobId, Vec<EventKind>> = HashMap::new();
        let mut finished = 0;
        while finished < 2 {
            let event = next_event(&mut events).await?;
            assert!(handles.iter().any(|h| h.output_file == *event.output_file()));
            if event.kind() != EventKind::JobStart {
                finished += 1;
            }
            seen.entry(event.job_id()).or_default().push(event.kind());
        }
        for handle in &handles {
            assert_eq!(seen[&handle.job_id], [EventKind::JobStart, EventKind::JobCompleted]);
            assert_eq!(api.get_job(handle.job_id).await?.state(), JobState::Completed);
        }

        assert!(api.list_active_jobs().await?.is_empty());
        let stats = api.stats().await?;
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.success_rate(), Some(100.0));

        // finished jobs stay queryable until purged
        assert_eq!(api.purge_finished(Duration::from_secs(3600)).await?, 0);
        let too_old = api.purge_finished(Duration::from_secs(10_000_000_000_000)).await;
        assert!(matches!(too_old, Err(ApiError::InvalidRequest(_))));
        let beyond_chrono = api.purge_finished(Duration::MAX).await;
        assert!(matches!(beyond_chrono, Err(ApiError::InvalidRequest(_))));
        assert_eq!(api.stats().await?.completed, 2);
        assert_eq!(api.purge_finished(Duration::ZERO).await?, 2);
        assert!(api.get_job(handles[0].job_id).await.is_err());

        pool.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_invalid_submissions_create_nothing() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let api = common::orchestrator(FaceSwapConfig::program("true")).await?;

        let cases = [
            request("", &["b.jpg"]),
            request("a.jpg", &[]),
            request("a.jpg", &["b.jpg", "../c.jpg"]),
            request("a.jpg", &["b.jpg", "missing.jpg"]),
            request("nope.jpg", &["b.jpg"]),
            request("sub/a.jpg", &["b.jpg"]),
        ];

        for case in cases {
            let result = api.submit_batch(case.clone()).await;
            let err = result.err().ok_or("invalid request accepted")?;
            assert!(err.is_client_error(), "{:?} gave {}", case, err);
        }

        let missing = api.submit_batch(request("a.jpg", &["missing.jpg"])).await;
        assert!(matches!(
            missing,
            Err(ApiError::MissingMedia { dir: MediaDir::Target, .. })
        ));

        let stats = api.stats().await?;
        assert_eq!(stats.active() + stats.processed(), 0);
        Ok(())
    })
}

#[test]
fn test_stop_all() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;

        let dir = tempfile::tempdir()?;
        let script = dir.path().join("slow.sh");
        std::fs::write(&script, "sleep 30\n")?;
        let faceswap = FaceSwapConfig {
            script: Some(script.to_string_lossy().into_owned()),
            ..FaceSwapConfig::program("sh")
        };
        let api = common::orchestrator(faceswap).await?;
        let mut events = api.subscribe().await?;

        let pool = start_pool(common::fast_pool(1), Arc::new(ProcessRunner)).await?;
        let handles = api.submit_batch(request("a.jpg", &["b.jpg", "c.jpg"])).await?;

        let started = next_event(&mut events).await?;
        assert_eq!(started.kind(), EventKind::JobStart);
        assert_eq!(started.job_id(), handles[0].job_id);

        let report = api.stop_all().await?;
        assert_eq!(report.drained.len(), 1);
        assert_eq!(report.drained[0].job_id, handles[1].job_id);
        assert_eq!(report.terminated_workers.len(), 1);

        let failed = next_event(&mut events).await?;
        assert_eq!(failed.job_id(), handles[0].job_id);
        assert!(matches!(
            failed,
            JobEvent::JobFailed { reason: FailureReason::Terminated, .. }
        ));

        let job = api.get_job(handles[0].job_id).await?;
        assert!(matches!(job.status, JobStatus::Failed { .. }));
        assert!(api.get_job(handles[1].job_id).await.is_err());
        assert!(api.list_active_jobs().await?.is_empty());

        // stopping an idle system is a no-op
        let idle = api.stop_all().await?;
        assert!(idle.drained.is_empty());
        assert!(idle.terminated_workers.is_empty());

        pool.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_media_files() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let api = common::orchestrator(FaceSwapConfig::program("true")).await?;

        let uploaded = api
            .upload(MediaDir::Source, "image/png", Bytes::from("png"))
            .await?;
        assert!(uploaded.name.ends_with(".png"));

        let sources = api.list_files(MediaDir::Source).await?;
        assert!(sources.iter().any(|f| f.name == uploaded.name));
        assert!(sources.iter().any(|f| f.name == "a.jpg"));

        let to_output = api
            .upload(MediaDir::Output, "image/png", Bytes::from("png"))
            .await;
        assert!(matches!(to_output, Err(ApiError::InvalidRequest(_))));

        api.delete_file(MediaDir::Source, &uploaded.name).await?;
        let again = api.delete_file(MediaDir::Source, &uploaded.name).await;
        assert!(again.as_ref().is_err_and(ApiError::is_client_error));

        let bad_id = api.get_job_str("not-a-ulid").await;
        assert!(matches!(bad_id, Err(ApiError::InvalidJobId(_))));
        Ok(())
    })
}
