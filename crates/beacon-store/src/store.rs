//! Async store interface and its SQLite implementation.

use async_trait::async_trait;
use beacon_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use beacon_types::NaturalKey;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::sync::Arc;

use crate::error::StoreError;
use crate::queries;
use crate::record::{FailedEvent, NewEventRecord, RetryOutcome};

/// The narrow CRUD surface the listener engine needs from durable storage.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Inserts the row for an event's first delivery attempt.
    async fn insert_event(&self, record: NewEventRecord) -> Result<i64, StoreError>;

    /// Applies a retried delivery's outcome to an existing row.
    async fn record_retry_outcome(&self, outcome: RetryOutcome) -> Result<(), StoreError>;

    /// Highest recorded block number for the listener.
    async fn latest_block_number(&self, listener_id: &str) -> Result<Option<u64>, StoreError>;

    /// Failed rows within a tries range whose last attempt is old enough.
    async fn failed_events(
        &self,
        listener_id: &str,
        min_tries: u32,
        max_tries: u32,
        last_try_before: DateTime<Utc>,
    ) -> Result<Vec<FailedEvent>, StoreError>;

    /// Whether a successful row exists for the natural key.
    async fn was_handled(&self, key: NaturalKey<'_>) -> Result<bool, StoreError>;
}

/// Opens fresh store connections.
///
/// The poll loop's supervisor calls this after a fault to replace the
/// store it shares with the retry loop.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn EventStore>, StoreError>;
}

/// [`EventStore`] backed by a pooled SQLite database.
///
/// Each operation checks out a connection and runs on the blocking thread
/// pool.
#[derive(Clone)]
pub struct SqliteEventStore {
    pool: DbPool,
}

impl SqliteEventStore {
    /// Wraps an existing pool. Migrations must already be applied.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn insert_event(&self, record: NewEventRecord) -> Result<i64, StoreError> {
        self.with_conn(move |conn| queries::insert_event(conn, &record))
            .await
    }

    async fn record_retry_outcome(&self, outcome: RetryOutcome) -> Result<(), StoreError> {
        self.with_conn(move |conn| queries::record_retry_outcome(conn, &outcome))
            .await
    }

    async fn latest_block_number(&self, listener_id: &str) -> Result<Option<u64>, StoreError> {
        let listener_id = listener_id.to_string();
        self.with_conn(move |conn| queries::latest_block_number(conn, &listener_id))
            .await
    }

    async fn failed_events(
        &self,
        listener_id: &str,
        min_tries: u32,
        max_tries: u32,
        last_try_before: DateTime<Utc>,
    ) -> Result<Vec<FailedEvent>, StoreError> {
        let listener_id = listener_id.to_string();
        self.with_conn(move |conn| {
            queries::failed_events(conn, &listener_id, min_tries, max_tries, last_try_before)
        })
        .await
    }

    async fn was_handled(&self, key: NaturalKey<'_>) -> Result<bool, StoreError> {
        let listener_id = key.listener_id.to_string();
        let transaction_hash = key.transaction_hash.to_string();
        let event_id = key.event_id.to_string();
        let block_number = key.block_number;
        self.with_conn(move |conn| {
            queries::was_handled(
                conn,
                &NaturalKey {
                    listener_id: &listener_id,
                    transaction_hash: &transaction_hash,
                    block_number,
                    event_id: &event_id,
                },
            )
        })
        .await
    }
}

/// Builds a new SQLite pool on every [`connect`](StoreConnector::connect)
/// and applies pending migrations before handing it out.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: String,
    settings: DbRuntimeSettings,
}

impl SqliteConnector {
    pub fn new(path: impl Into<String>, settings: DbRuntimeSettings) -> Self {
        Self {
            path: path.into(),
            settings,
        }
    }

    /// Synchronous variant of [`StoreConnector::connect`] returning the
    /// concrete store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Connect` if the pool cannot be built and
    /// `StoreError::Migration` if the schema cannot be brought up to date.
    pub fn open(&self) -> Result<SqliteEventStore, StoreError> {
        let pool = create_pool(&self.path, self.settings)?;
        {
            let conn = pool.get()?;
            let applied = run_migrations(&conn)?;
            if applied > 0 {
                tracing::info!(count = applied, path = %self.path, "applied database migrations");
            }
        }
        Ok(SqliteEventStore::new(pool))
    }
}

#[async_trait]
impl StoreConnector for SqliteConnector {
    async fn connect(&self) -> Result<Arc<dyn EventStore>, StoreError> {
        let connector = self.clone();
        let store = tokio::task::spawn_blocking(move || connector.open())
            .await
            .map_err(|e| StoreError::Join(e.to_string()))??;
        Ok(Arc::new(store))
    }
}
