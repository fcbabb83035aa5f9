//! Error types for the event store.

/// Errors that can occur during event store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A database operation failed.
    #[error("store database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No pooled connection could be checked out.
    #[error("store connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Creating a fresh pool failed.
    #[error("store connect error: {0}")]
    Connect(#[from] beacon_db::PoolError),

    /// Applying schema migrations failed.
    #[error("store migration error: {0}")]
    Migration(#[from] beacon_db::MigrationError),

    /// Event payload could not be serialised or deserialised.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored timestamp is not valid RFC 3339.
    #[error("invalid stored timestamp {0:?}")]
    Timestamp(String),

    /// Block numbers above `i64::MAX` cannot be stored.
    #[error("block number {0} exceeds the storable range")]
    BlockNumberOutOfRange(u64),

    /// A retry outcome referenced a row that does not exist.
    #[error("event row {0} not found")]
    NotFound(i64),

    /// The blocking database task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Join(String),
}
