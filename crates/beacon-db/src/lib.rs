//! SQLite plumbing for the Beacon event store.
//!
//! [`create_pool`] opens a WAL-mode r2d2 pool and [`run_migrations`] brings
//! the schema (the `events` delivery table and its indexes) up to date. The
//! store crate calls both every time it (re)connects, so a restarted poll
//! loop always works against a fresh pool on a current schema.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
