//! Player verification records and the session ids nobody claimed yet.
//!
//! The [`PlayerRegistry`] trait has an in-memory backend for tests and a
//! SQLite backend sharing the application database.

pub mod error;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Error, Result},
    store::PlayerRegistry,
    store_memory::InMemoryRegistry,
    store_sqlite::SqliteRegistry,
    types::{PENDING_SESSION_ID, PlayerRecord, SessionMapping, SessionSource, UnmappedSession},
};

/// Run database migrations for the registry crate.
///
/// This creates the `players` and `unmapped_sessions` tables.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
