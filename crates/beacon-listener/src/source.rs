//! The two capabilities a concrete listener supplies.

use async_trait::async_trait;
use beacon_types::SourceEvent;

/// Fetches events newer than a block.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Listener-specific event fields, flattened into [`SourceEvent`].
    type Data;

    /// Returns every event with a block number strictly greater than
    /// `after_block`.
    ///
    /// Ascending block order is expected but not enforced; events are
    /// delivered in the order returned. An error aborts the current poll
    /// cycle and restarts the poll loop.
    async fn fetch(&self, after_block: u64) -> anyhow::Result<Vec<SourceEvent<Self::Data>>>;
}

/// Consumes one event.
///
/// May be invoked more than once for the same event: delivery is
/// at-least-once. An `Err` (or a panic) marks the attempt as failed and
/// schedules it for retry.
#[async_trait]
pub trait EventHandler<T>: Send + Sync {
    async fn handle(&self, event: &SourceEvent<T>) -> anyhow::Result<()>;
}
