//! Error types for the listener engine.

use beacon_store::StoreError;

/// Faults that escape a single delivery or a loop cycle.
///
/// Handler failures are not represented here: they are recorded as failed
/// rows and never escape the delivery pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The durable store could not be read or written.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The event source failed to return a batch.
    #[error("fetch error: {0:#}")]
    Fetch(anyhow::Error),

    /// A loop task panicked or was cancelled.
    #[error("loop task failed: {0}")]
    Task(String),
}
