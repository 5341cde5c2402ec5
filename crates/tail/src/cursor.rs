//! Resumable byte cursors over append-only log files.
//!
//! A [`LogSource`] remembers how far into a file its reader got. The cursor
//! only moves forward, except when the file shrinks below it: that is a
//! rotation or truncation and the file is treated as a new logical stream
//! starting at byte 0.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    async_trait::async_trait,
    chrono::Utc,
    sqlx::{Row, SqlitePool},
};

use crate::Result;

/// Cursor state for one followed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    pub path: PathBuf,
    pub byte_offset: u64,
    pub last_known_size: u64,
}

/// What a size observation means for the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Nothing new since the last commit.
    Unchanged,
    /// The file grew; read `[start, end)`.
    Grown { start: u64, end: u64 },
    /// The file shrank below the cursor; read the new stream `[0, end)`.
    Rotated { end: u64 },
}

impl LogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            byte_offset: 0,
            last_known_size: 0,
        }
    }

    /// Compare a freshly observed size with the cursor.
    ///
    /// On rotation the cursor is reset to 0 before returning, so a failed
    /// read afterwards retries from the start of the new stream.
    pub fn observe(&mut self, size: u64) -> Observation {
        if size < self.byte_offset {
            self.byte_offset = 0;
            self.last_known_size = size;
            return Observation::Rotated { end: size };
        }
        self.last_known_size = size;
        if size == self.byte_offset {
            Observation::Unchanged
        } else {
            Observation::Grown {
                start: self.byte_offset,
                end: size,
            }
        }
    }

    /// Mark everything before `end` as consumed.
    pub fn commit(&mut self, end: u64) {
        debug_assert!(end >= self.byte_offset);
        self.byte_offset = end;
        self.last_known_size = self.last_known_size.max(end);
    }
}

/// Persistence for reader cursors, so a restarted process resumes where the
/// previous one stopped.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, path: &Path) -> Result<Option<LogSource>>;
    async fn save(&self, cursor: &LogSource) -> Result<()>;
}

/// In-memory cursor store. Cursors are lost with the process.
#[derive(Default)]
pub struct InMemoryCursorStore {
    cursors: Mutex<HashMap<PathBuf, LogSource>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(&self, path: &Path) -> Result<Option<LogSource>> {
        let cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        Ok(cursors.get(path).cloned())
    }

    async fn save(&self, cursor: &LogSource) -> Result<()> {
        let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        cursors.insert(cursor.path.clone(), cursor.clone());
        Ok(())
    }
}

/// SQLite-backed cursor store (`log_cursors` table).
pub struct SqliteCursorStore {
    pool: SqlitePool,
}

impl SqliteCursorStore {
    /// Create a store using an existing pool (migrations must already be run).
    ///
    /// Call [`crate::run_migrations`] before using this constructor.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn load(&self, path: &Path) -> Result<Option<LogSource>> {
        let row = sqlx::query(
            "SELECT byte_offset, last_known_size FROM log_cursors WHERE path = ?",
        )
        .bind(path.to_string_lossy().into_owned())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| LogSource {
            path: path.to_path_buf(),
            byte_offset: row.get::<i64, _>("byte_offset") as u64,
            last_known_size: row.get::<i64, _>("last_known_size") as u64,
        }))
    }

    async fn save(&self, cursor: &LogSource) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO log_cursors (path, byte_offset, last_known_size, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(path) DO UPDATE SET
                 byte_offset = excluded.byte_offset,
                 last_known_size = excluded.last_known_size,
                 updated_at = excluded.updated_at"#,
        )
        .bind(cursor.path.to_string_lossy().into_owned())
        .bind(cursor.byte_offset as i64)
        .bind(cursor.last_known_size as i64)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
