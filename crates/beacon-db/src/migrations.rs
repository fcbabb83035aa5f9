//! Schema migrations compiled into the binary.
//!
//! Applied migrations are recorded by name in `_beacon_migrations`. Both the
//! binary at startup and the store connector on every reconnect call
//! [`run_migrations`], so it must be cheap when nothing is pending.

use rusqlite::Connection;
use std::collections::HashSet;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// Append only; names are the tracking keys.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_init",
        sql: include_str!("migrations/000_init.sql"),
    },
    Migration {
        name: "001_events",
        sql: include_str!("migrations/001_events.sql"),
    },
];

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _beacon_migrations (
    name TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
)";

#[derive(Debug, Error)]
pub enum MigrationError {
    /// The tracking table could not be created or read.
    #[error("failed to read migration state: {0}")]
    StateQuery(#[source] rusqlite::Error),

    /// A migration's SQL, or recording it as applied, failed. Its changes
    /// were rolled back.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        #[source]
        source: rusqlite::Error,
    },
}

/// Applies every pending migration, each in its own transaction.
///
/// Returns how many were applied by this call.
///
/// # Errors
///
/// Stops at the first failing migration; earlier ones stay applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply(conn, MIGRATIONS)
}

fn applied_names(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    conn.execute_batch(TRACKING_TABLE)?;
    let mut stmt = conn.prepare("SELECT name FROM _beacon_migrations")?;
    let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
    names.collect()
}

fn apply(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    let done = applied_names(conn).map_err(MigrationError::StateQuery)?;
    let pending: Vec<&Migration> = migrations
        .iter()
        .filter(|m| !done.contains(m.name))
        .collect();

    if pending.is_empty() {
        tracing::debug!(known = migrations.len(), "schema is up to date");
        return Ok(0);
    }

    for migration in &pending {
        tracing::info!(migration = migration.name, "applying migration");
        apply_one(conn, migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        })?;
    }

    Ok(pending.len())
}

fn apply_one(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _beacon_migrations (name) VALUES (?1)",
        [migration.name],
    )?;
    tx.commit()
}
