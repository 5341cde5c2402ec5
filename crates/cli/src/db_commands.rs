use std::path::{Path, PathBuf};

use {clap::Subcommand, gatekeeper_config::GatekeeperConfig, sqlx::SqlitePool};

#[derive(Subcommand)]
pub enum DbAction {
    /// Delete the database file completely (including WAL/SHM sidecars).
    Reset,
    /// Clear players, unmapped sessions and log cursors but keep the schema.
    Clear,
    /// Run all pending database migrations.
    Migrate,
}

/// Tables in deletion order.
const TABLES: [&str; 3] = ["unmapped_sessions", "players", "log_cursors"];

pub async fn handle_db(
    action: DbAction,
    config: &GatekeeperConfig,
    data_dir: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        DbAction::Reset => {
            let path = gatekeeper_config::database_path(config, data_dir);
            if reset_database(&path)? {
                println!("Database deleted. Run `gatekeeper db migrate` to recreate it.");
            } else {
                println!("No database files found at {}.", path.display());
            }
            Ok(())
        },
        DbAction::Clear => {
            let pool = crate::open_database(config, data_dir).await?;
            clear_tables(&pool).await;
            pool.close().await;
            println!("Database cleared.");
            Ok(())
        },
        DbAction::Migrate => {
            // Opening runs the tail and registry migrations.
            let pool = crate::open_database(config, data_dir).await?;
            pool.close().await;
            println!("All migrations complete.");
            Ok(())
        },
    }
}

fn sidecar(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Delete the database and its sidecars. Returns whether anything existed.
fn reset_database(path: &Path) -> anyhow::Result<bool> {
    let mut deleted = false;
    for suffix in ["", "-wal", "-shm"] {
        let file = sidecar(path, suffix);
        if file.exists() {
            std::fs::remove_file(&file)?;
            println!("Deleted: {}", file.display());
            deleted = true;
        }
    }
    Ok(deleted)
}

async fn clear_tables(pool: &SqlitePool) {
    for table in TABLES {
        let query = format!("DELETE FROM {table}");
        match sqlx::query(&query).execute(pool).await {
            Ok(done) => println!("Cleared {table} ({} rows)", done.rows_affected()),
            Err(e) => eprintln!("Warning: could not clear {table}: {e}"),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    #[test]
    fn reset_deletes_database_and_sidecars() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("players.sqlite");
        for suffix in ["", "-wal", "-shm"] {
            std::fs::write(sidecar(&db, suffix), "x").unwrap();
        }

        assert!(reset_database(&db).unwrap());
        assert!(!db.exists());
        assert!(!temp.path().join("players.sqlite-wal").exists());
        assert!(!temp.path().join("players.sqlite-shm").exists());
        assert!(!reset_database(&db).unwrap());
    }

    #[tokio::test]
    async fn migrate_then_clear_empties_tables() {
        let temp = TempDir::new().unwrap();
        let config = GatekeeperConfig::default();

        let pool = crate::open_database(&config, Some(temp.path()))
            .await
            .unwrap();
        assert!(temp.path().join("gatekeeper.db").exists());

        sqlx::query(
            "INSERT INTO log_cursors (path, byte_offset, last_known_size, updated_at) \
             VALUES ('/logs/login.log', 10, 10, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        clear_tables(&pool).await;
        for table in TABLES {
            let (n,): (i64,) = sqlx::query_as(&format!("SELECT count(*) FROM {table}"))
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(n, 0, "{table} should be empty");
        }
        pool.close().await;

        // Reopening is idempotent.
        crate::open_database(&config, Some(temp.path()))
            .await
            .unwrap()
            .close()
            .await;
    }
}
