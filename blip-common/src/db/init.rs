//! Database initialization
//!
//! Creates the SQLite database on first run and applies the schema
//! idempotently. Three write paths: an append-only raw-event archive, an
//! append-only reading store, and an upsertable device inventory table.

use std::path::Path;

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::Result;

/// Initialize database connection and create tables if needed.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_pragmas(&pool).await?;
    create_tables(&pool).await?;

    Ok(pool)
}

/// Open an in-memory database with the full schema (tests and tooling).
///
/// An in-memory SQLite database is per-connection, so the pool is pinned
/// to a single connection.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    configure_pragmas(&pool).await?;
    create_tables(&pool).await?;
    Ok(pool)
}

async fn configure_pragmas(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL allows concurrent readers with one writer; the pipeline's
    // workers write from several tasks at once.
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    Ok(())
}

/// Apply the schema (idempotent - safe to call multiple times).
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_raw_events_table(pool).await?;
    create_readings_table(pool).await?;
    create_devices_table(pool).await?;
    Ok(())
}

/// Append-only archive of every delivered advertisement, verbatim.
pub async fn create_raw_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_events (
            id TEXT PRIMARY KEY,
            scanner_id TEXT NOT NULL,
            address TEXT NOT NULL,
            rssi INTEGER NOT NULL,
            name TEXT,
            event_json TEXT NOT NULL,
            detected_at TEXT NOT NULL,
            received_at TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_raw_events_address ON raw_events(address)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Append-only structured readings, each carrying raw-event lineage.
pub async fn create_readings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            raw_event_id TEXT NOT NULL,
            address TEXT NOT NULL,
            device_type TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            measurements_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_readings_address ON readings(address)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Device inventory: one row per unique device address.
pub async fn create_devices_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            address TEXT PRIMARY KEY,
            device_type TEXT NOT NULL DEFAULT 'unknown',
            name TEXT,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            event_count INTEGER NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_devices_last_seen ON devices(last_seen)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_memory_database_creates_tables() {
        let pool = init_memory_database().await.expect("init failed");

        for table in ["raw_events", "readings", "devices"] {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_create_tables_idempotent() {
        let pool = init_memory_database().await.unwrap();
        create_tables(&pool).await.expect("second apply failed");
    }

    #[tokio::test]
    async fn test_init_database_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("blip.db");

        let pool = init_database(&db_path).await.expect("init failed");
        drop(pool);

        assert!(db_path.exists());
    }
}
