//! SQLite pool for the event store.
//!
//! Every pooled connection is switched to WAL and given the configured busy
//! timeout before it is handed out. The poll loop drops and rebuilds the
//! whole pool when it reconnects, so building must fail fast and clearly.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Pooled connections to one database file.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Connection tunables, taken from the `[database]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a statement waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
    pub pool_max_size: u32,
    /// How long `pool.get()` waits for a free connection, in milliseconds.
    pub checkout_timeout_ms: u64,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 4,
            checkout_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    /// The database file would live in a directory that does not exist.
    #[error("database directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    /// r2d2 could not open the initial connections.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Opens (creating if needed) the database at `db_path` and pools
/// connections to it.
///
/// `:memory:` is accepted, but each pooled connection then gets a private
/// database; only use it with `pool_max_size = 1`.
///
/// # Errors
///
/// `PoolError::MissingDirectory` if the parent directory is absent,
/// `PoolError::PoolInit` if connections cannot be opened or initialized.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    if let Some(dir) = missing_parent(db_path) {
        return Err(PoolError::MissingDirectory(dir));
    }

    let busy_timeout = settings.busy_timeout_ms;
    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .with_init(move |conn| init_connection(conn, busy_timeout));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .connection_timeout(Duration::from_millis(settings.checkout_timeout_ms))
        .build(manager)?;

    tracing::debug!(
        path = db_path,
        pool_max_size = settings.pool_max_size,
        busy_timeout_ms = settings.busy_timeout_ms,
        "opened event database"
    );
    Ok(pool)
}

fn missing_parent(db_path: &str) -> Option<PathBuf> {
    if db_path == ":memory:" {
        return None;
    }
    let parent = Path::new(db_path).parent()?;
    if parent.as_os_str().is_empty() || parent.is_dir() {
        None
    } else {
        Some(parent.to_path_buf())
    }
}

fn init_connection(conn: &mut Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    // In-memory databases cannot use WAL and report "memory".
    if mode != "wal" && mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("journal_mode is {mode}, expected wal")),
        ));
    }
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
}
