//! Publish/subscribe channels over SurrealDB live queries.
//!
//! A message is published by creating a row in the channel table and
//! deleting it again straight away. Every `LIVE SELECT` open on the table at
//! that moment is notified of the creation, in whichever process it lives,
//! and nothing is left behind for late subscribers to replay.

use std::marker::PhantomData;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use queue_core::{JobEvent, WorkerCommand};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use surrealdb::{Action, Notification};
use ulid::Ulid;

use crate::{DbError, get_db};

/// Live stream of messages received on a channel.
///
/// The stream is unbounded and cannot be restarted; dropping it closes the
/// underlying live query.
pub type Subscription<T> = BoxStream<'static, Result<T, DbError>>;

/// Row shape of a channel table. `payload` is optional so that the delete
/// notification, which some engines send without the record body, still
/// deserializes.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    payload: Option<T>,
}

/// A fan-out channel backed by one table.
#[derive(Debug)]
pub struct LiveChannel<T> {
    table: &'static str,
    _message: PhantomData<fn() -> T>,
}

impl<T> Clone for LiveChannel<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for LiveChannel<T> {}

/// Channel carrying job lifecycle events.
pub type EventBroadcaster = LiveChannel<JobEvent>;

/// Channel carrying commands addressed to workers.
pub type ControlChannel = LiveChannel<WorkerCommand>;

impl LiveChannel<JobEvent> {
    pub const fn events() -> Self {
        Self::new("job_event")
    }
}

impl LiveChannel<WorkerCommand> {
    pub const fn control() -> Self {
        Self::new("worker_command")
    }
}

impl<T> LiveChannel<T> {
    const fn new(table: &'static str) -> Self {
        Self {
            table,
            _message: PhantomData,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }
}

impl<T> LiveChannel<T>
where
    T: Serialize + DeserializeOwned + Send + Unpin + 'static,
{
    /// Deliver `message` to every current subscriber, best-effort.
    pub async fn publish(&self, message: T) -> Result<(), DbError> {
        let db = get_db()?;
        let key = Ulid::new().to_string();

        let _: Option<Envelope<T>> = db
            .create((self.table, key.clone()))
            .content(Envelope {
                payload: Some(message),
            })
            .await?;
        let _: Option<Envelope<T>> = db.delete((self.table, key)).await?;

        Ok(())
    }

    /// Open a live subscription. Only messages published after this call
    /// returns are delivered.
    pub async fn subscribe(&self) -> Result<Subscription<T>, DbError> {
        let db = get_db()?;

        let stream: surrealdb::method::Stream<Vec<Envelope<T>>> =
            db.select(self.table).live().await?;

        tracing::debug!("Subscribed to live channel {}", self.table);

        Ok(stream
            .filter_map(
                |item: Result<Notification<Envelope<T>>, surrealdb::Error>| async move {
                    match item {
                        Ok(notification) if matches!(notification.action, Action::Create) => {
                            notification.data.payload.map(Ok)
                        }
                        Ok(_) => None,
                        Err(e) => Some(Err(DbError::from(e))),
                    }
                },
            )
            .boxed())
    }
}
