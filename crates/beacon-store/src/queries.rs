//! Synchronous persistence operations on the `events` table.
//!
//! Every function takes a plain [`Connection`] so it can run inside a
//! blocking task, a transaction, or a test without a pool. All queries are
//! scoped by `listener_id`; rows of other listener identities are never
//! read or written.

use beacon_types::NaturalKey;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::StoreError;
use crate::record::{
    block_to_sql, format_timestamp, parse_timestamp, EventRecord, FailedEvent, NewEventRecord,
    RetryOutcome,
};

/// Inserts the row for an event's first delivery attempt.
///
/// Returns the new row ID.
///
/// # Errors
///
/// Returns `StoreError::Database` on SQL failure.
pub fn insert_event(conn: &Connection, record: &NewEventRecord) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO events
            (event_id, block_number, transaction_hash, listener_id, success, tries, last_try_at, payload_json)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)",
        params![
            record.event_id,
            block_to_sql(record.block_number)?,
            record.transaction_hash,
            record.listener_id,
            record.success,
            format_timestamp(record.attempted_at),
            record.payload_json,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Writes the outcome of a retried delivery onto an existing row.
///
/// # Errors
///
/// Returns `StoreError::NotFound` if no row has the given ID.
pub fn record_retry_outcome(conn: &Connection, outcome: &RetryOutcome) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE events SET success = ?2, tries = ?3, last_try_at = ?4 WHERE id = ?1",
        params![
            outcome.row_id,
            outcome.success,
            outcome.tries,
            format_timestamp(outcome.attempted_at),
        ],
    )?;

    if updated == 0 {
        return Err(StoreError::NotFound(outcome.row_id));
    }
    Ok(())
}

/// Returns the highest block number recorded for the listener, if any.
///
/// Failed rows count too: the resume point never moves backwards to refetch
/// an event that is already tracked.
pub fn latest_block_number(conn: &Connection, listener_id: &str) -> Result<Option<u64>, StoreError> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(block_number) FROM events WHERE listener_id = ?1",
        params![listener_id],
        |row| row.get(0),
    )?;
    Ok(max.map(|n| n.max(0) as u64))
}

/// Selects failed rows with `tries` in `min_tries..=max_tries` whose last
/// attempt happened at or before `last_try_before`.
///
/// Results are ordered by row ID, which is insertion order.
pub fn failed_events(
    conn: &Connection,
    listener_id: &str,
    min_tries: u32,
    max_tries: u32,
    last_try_before: DateTime<Utc>,
) -> Result<Vec<FailedEvent>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, tries, payload_json
         FROM events
         WHERE success = 0 AND listener_id = ?1 AND tries >= ?2 AND tries <= ?3 AND last_try_at <= ?4
         ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(
        params![
            listener_id,
            min_tries,
            max_tries,
            format_timestamp(last_try_before)
        ],
        |row| {
            Ok(FailedEvent {
                id: row.get(0)?,
                tries: row.get(1)?,
                payload_json: row.get(2)?,
            })
        },
    )?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Returns `true` if a successful row exists for the natural key.
pub fn was_handled(conn: &Connection, key: &NaturalKey<'_>) -> Result<bool, StoreError> {
    let handled: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM events
            WHERE transaction_hash = ?1 AND block_number = ?2 AND event_id = ?3
              AND listener_id = ?4 AND success = 1
         )",
        params![
            key.transaction_hash,
            block_to_sql(key.block_number)?,
            key.event_id,
            key.listener_id,
        ],
        |row| row.get(0),
    )?;
    Ok(handled)
}

/// Fetches a single row by ID.
///
/// Not used by the listener itself; kept for inspecting the table from
/// tooling and tests.
pub fn get_event(conn: &Connection, row_id: i64) -> Result<Option<EventRecord>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT id, event_id, block_number, transaction_hash, listener_id, success, tries, last_try_at, payload_json
             FROM events WHERE id = ?1",
            params![row_id],
            RawRecord::from_row,
        )
        .optional()?;

    raw.map(RawRecord::into_record).transpose()
}

/// Lists every row of the listener in insertion order.
///
/// Like [`get_event`], an inspection helper outside the delivery path.
pub fn list_events(conn: &Connection, listener_id: &str) -> Result<Vec<EventRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, event_id, block_number, transaction_hash, listener_id, success, tries, last_try_at, payload_json
         FROM events WHERE listener_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![listener_id], RawRecord::from_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?.into_record()?);
    }
    Ok(records)
}

/// Row as read from SQLite, before timestamp parsing.
struct RawRecord {
    id: i64,
    event_id: String,
    block_number: i64,
    transaction_hash: String,
    listener_id: String,
    success: bool,
    tries: u32,
    last_try_at: String,
    payload_json: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_id: row.get(1)?,
            block_number: row.get(2)?,
            transaction_hash: row.get(3)?,
            listener_id: row.get(4)?,
            success: row.get(5)?,
            tries: row.get(6)?,
            last_try_at: row.get(7)?,
            payload_json: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<EventRecord, StoreError> {
        Ok(EventRecord {
            id: self.id,
            event_id: self.event_id,
            block_number: self.block_number.max(0) as u64,
            transaction_hash: self.transaction_hash,
            listener_id: self.listener_id,
            success: self.success,
            tries: self.tries,
            last_try_at: parse_timestamp(&self.last_try_at)?,
            payload_json: self.payload_json,
        })
    }
}
