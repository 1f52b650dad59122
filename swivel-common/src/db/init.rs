//! Database initialization
//!
//! Opens (creating if needed) the SQLite sighting database and brings the
//! schema up idempotently. Device, place and link tables are upserted in
//! place; `sightings` and `relocations` are append-only.

use crate::Result;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every connection
///
/// Writers for distinct devices contend on SQLite's single write lock;
/// waiting here keeps contention from surfacing as per-device failures.
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas go on the connect options so every pooled connection carries them.
    // WAL lets report readers see a consistent snapshot while a writer is active.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_devices_table(pool).await?;
    create_places_table(pool).await?;
    create_sightings_table(pool).await?;
    create_device_place_links_table(pool).await?;
    create_relocations_table(pool).await?;
    Ok(())
}

/// Back up the current database file and start over with an empty schema
///
/// The old file (with its WAL side files) is renamed to
/// `<file>.bak.<8 random alphanumerics>`. Close any pool on the old file
/// first. Returns the new pool and the backup path (None when there was
/// nothing to back up).
pub async fn recreate_database(db_path: &Path) -> Result<(SqlitePool, Option<PathBuf>)> {
    let backup = if db_path.exists() {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let backup_path = PathBuf::from(format!("{}.bak.{}", db_path.display(), suffix));
        std::fs::rename(db_path, &backup_path)?;
        // Un-checkpointed pages live in the WAL; it travels with the backup
        for side in ["-wal", "-shm"] {
            let side_path = PathBuf::from(format!("{}{}", db_path.display(), side));
            if side_path.exists() {
                std::fs::rename(&side_path, format!("{}{}", backup_path.display(), side))?;
            }
        }
        info!("Backed up database to {}", backup_path.display());
        Some(backup_path)
    } else {
        None
    };

    let pool = init_database(db_path).await?;
    info!("Database recreated");
    Ok((pool, backup))
}

/// Create the settings table
///
/// Stores runtime configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_devices_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            device_key TEXT PRIMARY KEY,
            name TEXT,
            last_known_address TEXT NOT NULL,
            gatt_signature TEXT,
            times_seen INTEGER NOT NULL DEFAULT 0,
            first_seen_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_devices_address ON devices(last_known_address)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_devices_gatt_signature ON devices(gatt_signature)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_places_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS places (
            place_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            radius_meters REAL NOT NULL DEFAULT 50.0 CHECK (radius_meters > 0),
            created_at TEXT NOT NULL,
            last_seen_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sightings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sightings (
            sighting_id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_key TEXT NOT NULL REFERENCES devices(device_key),
            place_id INTEGER REFERENCES places(place_id),
            timestamp TEXT NOT NULL,
            rssi INTEGER NOT NULL,
            raw_address TEXT NOT NULL,
            gatt_signature_at_time TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sightings_gatt_signature ON sightings(gatt_signature_at_time)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sightings_device ON sightings(device_key, timestamp)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_device_place_links_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS device_place_links (
            device_key TEXT NOT NULL REFERENCES devices(device_key),
            place_id INTEGER NOT NULL REFERENCES places(place_id),
            times_seen INTEGER NOT NULL DEFAULT 1,
            first_seen_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            PRIMARY KEY (device_key, place_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_relocations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS relocations (
            relocation_id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_key TEXT NOT NULL REFERENCES devices(device_key),
            from_place_id INTEGER NOT NULL REFERENCES places(place_id),
            to_place_id INTEGER NOT NULL REFERENCES places(place_id),
            timestamp TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
