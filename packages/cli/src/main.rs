//! Operator CLI for the face-swap job service.
//!
//! Talks to the shared store directly, so it needs the same `DB_*` and
//! `MEDIA_*` environment as the workers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, ValueEnum};
use futures_util::StreamExt;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use api::{Job, JobHandle, JobStatus, MediaDir, Orchestrator, SubmitBatchRequest};

#[derive(Parser, Debug)]
#[command(name = "jobctl")]
#[command(version)]
#[command(about = "Submit and manage face-swap jobs")]
#[command(propagate_version = true)]
struct Args {
    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Queue one job per target for a source face
    Submit {
        /// File name in the source directory
        #[arg(long, short = 's')]
        source: String,

        /// File names in the target directory
        #[arg(long = "target", short = 't', required = true)]
        targets: Vec<String>,

        /// Extra options passed to every command, after `--`
        #[arg(last = true)]
        extra_options: Vec<String>,
    },

    /// List pending and running jobs
    Jobs,

    /// Show one job
    Get {
        /// Job ID
        job_id: String,
    },

    /// Drop pending jobs and terminate running ones
    StopAll,

    /// Print lifecycle events as they happen
    Watch,

    /// List registered workers
    Workers,

    /// Job counts by state
    Stats,

    /// Delete finished jobs
    Purge {
        /// Only jobs finished at least this many seconds ago
        #[arg(long, default_value = "86400")]
        older_than_secs: u64,
    },

    /// List files in a media directory
    Files {
        #[arg(value_parser = parse_dir)]
        dir: MediaDir,
    },

    /// Upload a source or target file
    Upload {
        #[arg(value_parser = parse_dir)]
        dir: MediaDir,

        /// Local file (.jpg, .jpeg, .png or .mp4)
        path: PathBuf,
    },

    /// Delete a media file
    Delete {
        #[arg(value_parser = parse_dir)]
        dir: MediaDir,

        name: String,
    },
}

fn parse_dir(s: &str) -> Result<MediaDir, String> {
    s.parse::<MediaDir>().map_err(|e| e.to_string())
}

fn content_type_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "mp4" => Some("video/mp4"),
        _ => None,
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_handles(handles: &[JobHandle]) {
    if handles.is_empty() {
        println!("No jobs.");
        return;
    }
    println!("{:<28} {}", "JOB ID", "OUTPUT");
    for handle in handles {
        println!("{:<28} {}", handle.job_id, handle.output_file.name);
    }
}

fn print_job(job: &Job) {
    println!("Job ID:     {}", job.id);
    println!("Status:     {}", job.status.as_str());
    if let Some(worker) = job.status.worker() {
        println!("Worker:     {}", worker);
    }
    if let JobStatus::Failed { reason, .. } = &job.status {
        println!("Reason:     {}", reason);
    }
    println!("Output:     {}", job.output_file.name);
    println!("URL:        {}", job.output_file.url);
    println!("Command:    {}", job.command);
    println!("Created:    {}", job.created_at.to_rfc3339());
    println!("Updated:    {}", job.updated_at.to_rfc3339());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let api = Orchestrator::from_env()
        .await
        .context("failed to connect to the job store")?;
    let json = matches!(args.output, OutputFormat::Json);

    match args.command {
        Commands::Submit {
            source,
            targets,
            extra_options,
        } => {
            let handles = api
                .submit_batch(SubmitBatchRequest {
                    source,
                    targets,
                    extra_options,
                })
                .await?;
            if json {
                print_json(&handles)?;
            } else {
                println!("Submitted {} jobs", handles.len());
                print_handles(&handles);
            }
        }

        Commands::Jobs => {
            let handles = api.list_active_jobs().await?;
            if json {
                print_json(&handles)?;
            } else {
                print_handles(&handles);
            }
        }

        Commands::Get { job_id } => {
            let job = api.get_job_str(&job_id).await?;
            if json {
                print_json(&job)?;
            } else {
                print_job(&job);
            }
        }

        Commands::StopAll => {
            let report = api.stop_all().await?;
            if json {
                print_json(&report)?;
            } else {
                println!("Drained {} pending jobs", report.drained.len());
                for worker in &report.terminated_workers {
                    println!("Terminated job on {}", worker);
                }
            }
        }

        Commands::Watch => {
            let mut events = api.subscribe().await?;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    item = events.next() => {
                        let Some(event) = item else { break };
                        let event = event?;
                        if json {
                            println!("{}", serde_json::to_string(&event)?);
                        } else {
                            println!("{} {}", event.timestamp().to_rfc3339(), event.description());
                        }
                    }
                }
            }
        }

        Commands::Workers => {
            let workers = api.list_workers().await?;
            if json {
                print_json(&workers)?;
            } else if workers.is_empty() {
                println!("No workers registered.");
            } else {
                println!("{:<40} {:<6} {:<28} {}", "NAME", "STATUS", "JOB", "LAST SEEN");
                for worker in &workers {
                    let job = worker
                        .current_job
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<40} {:<6} {:<28} {}",
                        worker.name,
                        worker.status,
                        job,
                        worker.heartbeat_at.to_rfc3339()
                    );
                }
            }
        }

        Commands::Stats => {
            let stats = api.stats().await?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Pending:    {}", stats.pending);
                println!("Started:    {}", stats.started);
                println!("Completed:  {}", stats.completed);
                println!("Failed:     {}", stats.failed);
                if let Some(rate) = stats.success_rate() {
                    println!("Success:    {:.1}%", rate);
                }
            }
        }

        Commands::Purge { older_than_secs } => {
            let purged = api
                .purge_finished(Duration::from_secs(older_than_secs))
                .await?;
            if json {
                print_json(&serde_json::json!({ "purged": purged }))?;
            } else {
                println!("Purged {} finished jobs", purged);
            }
        }

        Commands::Files { dir } => {
            let files = api.list_files(dir).await?;
            if json {
                print_json(&files)?;
            } else {
                for file in &files {
                    println!("{:<40} {}", file.name, file.url);
                }
            }
        }

        Commands::Upload { dir, path } => {
            let content_type = content_type_for(&path)
                .with_context(|| format!("unsupported file type: {}", path.display()))?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let file = api.upload(dir, content_type, Bytes::from(bytes)).await?;
            if json {
                print_json(&file)?;
            } else {
                println!("{} {}", file.name, file.url);
            }
        }

        Commands::Delete { dir, name } => {
            api.delete_file(dir, &name).await?;
            if !json {
                println!("Deleted {}/{}", dir, name);
            }
        }
    }

    Ok(())
}
