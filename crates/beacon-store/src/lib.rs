//! Durable delivery tracking for Beacon listeners.
//!
//! One row in the `events` table exists per observed event and listener
//! identity. The row records whether the handler has succeeded for that
//! event, how many attempts were made and when the last one happened.
//!
//! The store is consumed through four operations plus one idempotency read:
//!
//! | Operation | Used by |
//! |-----------|---------|
//! | [`EventStore::insert_event`] | poll loop, first delivery |
//! | [`EventStore::record_retry_outcome`] | retry loop |
//! | [`EventStore::latest_block_number`] | poll loop, resume point |
//! | [`EventStore::failed_events`] | retry loop sweeps |
//! | [`EventStore::was_handled`] | delivery pipeline, both loops |
//!
//! Rows are never deleted here; retention is an operator concern.
//!
//! The synchronous functions in [`queries`] implement the SQL and are what
//! [`SqliteEventStore`] runs on the blocking pool.

mod error;
pub mod queries;
mod record;
mod store;

pub use error::StoreError;
pub use record::{EventRecord, FailedEvent, NewEventRecord, RetryOutcome};
pub use store::{EventStore, SqliteConnector, SqliteEventStore, StoreConnector};
