//! Crash-resumable tailing of append-only game server logs.
//!
//! A [`TailReader`] follows one file (or a daily series of files) from a byte
//! cursor persisted in a [`CursorStore`], emitting only lines appended since
//! the last poll. The [`ReaderRegistry`] runs one polling loop per reader.

pub mod cursor;
pub mod error;
pub mod locator;
pub mod reader;
pub mod registry;
#[cfg(feature = "file-watcher")]
pub mod watcher;

pub use {
    cursor::{CursorStore, InMemoryCursorStore, LogSource, Observation, SqliteCursorStore},
    error::{Error, Result},
    locator::{DailyFiles, FixedPath, LogLocator},
    reader::TailReader,
    registry::{ReaderRegistry, SourcedLine, TailOptions},
};

/// Run database migrations for the tail crate.
///
/// This creates the `log_cursors` table used by [`SqliteCursorStore`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
