//! Database initialization tests

use swivel_common::db::init::{init_database, recreate_database};

const TABLES: [&str; 6] = [
    "settings",
    "devices",
    "places",
    "sightings",
    "device_place_links",
    "relocations",
];

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("swivel.db");

    let pool = init_database(&db_path).await;
    assert!(pool.is_ok(), "Database initialization failed: {:?}", pool.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_all_tables_created() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("swivel.db")).await.unwrap();

    for table in TABLES {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists, "table {} missing", table);
    }
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("swivel.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query("INSERT INTO settings (key, value) VALUES ('marker', 'kept')")
        .execute(&pool1)
        .await
        .unwrap();
    pool1.close().await;

    // Second open is idempotent and keeps data
    let pool2 = init_database(&db_path).await.unwrap();
    let value: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'marker'")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(value, "kept");
}

#[tokio::test]
async fn test_recreate_backs_up_and_empties() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("swivel.db");

    let pool = init_database(&db_path).await.unwrap();
    sqlx::query("INSERT INTO settings (key, value) VALUES ('marker', 'old')")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let (pool, backup) = recreate_database(&db_path).await.unwrap();
    let backup = backup.expect("existing database should be backed up");
    assert!(backup.exists());
    let backup_name = backup.file_name().unwrap().to_string_lossy().to_string();
    assert!(backup_name.starts_with("swivel.db.bak."));
    assert_eq!(backup_name.len(), "swivel.db.bak.".len() + 8);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_recreate_without_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let (_pool, backup) = recreate_database(&dir.path().join("fresh.db")).await.unwrap();
    assert!(backup.is_none());
}

#[tokio::test]
async fn test_foreign_keys_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("swivel.db")).await.unwrap();

    let result = sqlx::query(
        "INSERT INTO sightings (device_key, place_id, timestamp, rssi, raw_address)
         VALUES ('missing-device', NULL, '2024-01-01T00:00:00Z', -50, 'AA:BB')",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err(), "sighting for unknown device must be rejected");
}
