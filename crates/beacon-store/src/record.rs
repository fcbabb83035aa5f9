//! Row types for the `events` table.

use beacon_types::SourceEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

/// Input for the first delivery attempt of an event.
///
/// Rows are only ever created by the poll loop, always with `tries = 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEventRecord {
    pub event_id: String,
    pub block_number: u64,
    pub transaction_hash: String,
    /// Rendered listener identity.
    pub listener_id: String,
    /// Outcome of the first attempt.
    pub success: bool,
    /// When the first attempt finished.
    pub attempted_at: DateTime<Utc>,
    /// Full event as JSON.
    pub payload_json: String,
}

impl NewEventRecord {
    /// Builds the insert for `event`, serialising the whole event as payload.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Serialization` if the event cannot be encoded.
    pub fn first_attempt<T: Serialize>(
        event: &SourceEvent<T>,
        listener_id: &str,
        success: bool,
        attempted_at: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            event_id: event.id.clone(),
            block_number: event.block_number,
            transaction_hash: event.transaction_hash.clone(),
            listener_id: listener_id.to_string(),
            success,
            attempted_at,
            payload_json: serde_json::to_string(event)?,
        })
    }
}

/// Outcome of a retried delivery, applied to an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Row id returned by a failed-event sweep.
    pub row_id: i64,
    pub success: bool,
    /// New attempt count (previous + 1).
    pub tries: u32,
    pub attempted_at: DateTime<Utc>,
}

/// A stored event row.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Internal database ID.
    pub id: i64,
    pub event_id: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub listener_id: String,
    pub success: bool,
    pub tries: u32,
    pub last_try_at: DateTime<Utc>,
    pub payload_json: String,
}

/// A failed row selected by a retry sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedEvent {
    /// Internal database ID, used to update the row after the retry.
    pub id: i64,
    /// Attempts made so far.
    pub tries: u32,
    pub payload_json: String,
}

impl FailedEvent {
    /// Decodes the stored payload back into the listener's event shape.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<SourceEvent<T>, serde_json::Error> {
        serde_json::from_str(&self.payload_json)
    }
}

/// Renders a timestamp so that lexical order equals chronological order.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp(raw.to_string()))
}

pub(crate) fn block_to_sql(block_number: u64) -> Result<i64, StoreError> {
    i64::try_from(block_number).map_err(|_| StoreError::BlockNumberOutOfRange(block_number))
}
