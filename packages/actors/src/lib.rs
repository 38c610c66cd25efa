//! Actor system for the worker pool.
//!
//! This crate provides the Ractor-based actors that pull jobs from the
//! shared queue and run their commands.
//!
//! # Architecture
//!
//! - `Supervisor` - Owns one pool: the dispatcher, the workers and the
//!   control channel subscription
//! - `QueueActor` - Per-process dispatcher; claims, reports and reaping
//!   all go through it
//! - `WorkerActor` - Runs one job at a time through a `CommandRunner`
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use actors::{PoolConfig, ProcessRunner, start_pool};
//!
//! db::init(db::DbConfig::from_env()).await?;
//! let pool = start_pool(PoolConfig::from_env()?, Arc::new(ProcessRunner)).await?;
//!
//! tokio::signal::ctrl_c().await?;
//! pool.shutdown().await?;
//! ```

mod config;
mod messages;
mod queue_actor;
mod runner;
mod supervisor;
mod worker_actor;

pub use config::{ConfigError, PoolConfig};
pub use messages::{ActorError, QueueMessage, SupervisorMessage, WorkerMessage};
pub use queue_actor::{QueueActor, QueueActorState};
pub use runner::{CommandRunner, FnRunner, ProcessRunner, RunFuture, RunOutcome};
pub use supervisor::{PoolArgs, Supervisor, WorkerPool, start_pool, terminate_busy_workers};
pub use worker_actor::{WorkerActor, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
