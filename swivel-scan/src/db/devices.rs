//! Device persistence

use super::SightingStore;
use crate::identity::DeviceLookup;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use swivel_common::db::Device;
use swivel_common::{time, Result};

const DEVICE_COLUMNS: &str =
    "device_key, name, last_known_address, gatt_signature, times_seen, first_seen_at, last_seen_at";

impl SightingStore {
    /// Create or update a device
    ///
    /// Idempotent for identical input. The address is always replaced; the
    /// signature and name are only replaced by non-null values; `last_seen_at`
    /// never moves backwards.
    pub async fn upsert_device(
        &self,
        device_key: &str,
        raw_address: &str,
        gatt_signature: Option<&str>,
        name: Option<&str>,
    ) -> Result<Device> {
        self.upsert_device_at(device_key, raw_address, gatt_signature, name, time::now())
            .await
    }

    /// [`upsert_device`](Self::upsert_device) with an explicit observation time
    pub async fn upsert_device_at(
        &self,
        device_key: &str,
        raw_address: &str,
        gatt_signature: Option<&str>,
        name: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> Result<Device> {
        let _guard = self.locks.lock(device_key).await;
        let mut conn = self.pool.acquire().await?;
        write_device(&mut conn, device_key, raw_address, gatt_signature, name, seen_at, 0).await
    }

    pub async fn get_device(&self, device_key: &str) -> Result<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(&format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_key = ?"))
            .bind(device_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(device)
    }

    pub async fn find_device_by_address(&self, address: &str) -> Result<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE last_known_address = ? ORDER BY last_seen_at DESC LIMIT 1"
        ))
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    /// Most recently seen device with this signature
    pub async fn find_device_by_signature(&self, gatt_signature: &str) -> Result<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE gatt_signature = ? ORDER BY last_seen_at DESC, device_key LIMIT 1"
        ))
        .bind(gatt_signature)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    /// All devices, most recently seen first
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY last_seen_at DESC, device_key"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(devices)
    }
}

/// Insert-or-update one device row, adding `sightings` to `times_seen`
///
/// Callers hold the device key lock.
pub(super) async fn write_device(
    conn: &mut SqliteConnection,
    device_key: &str,
    raw_address: &str,
    gatt_signature: Option<&str>,
    name: Option<&str>,
    seen_at: DateTime<Utc>,
    sightings: i64,
) -> Result<Device> {
    let device = sqlx::query_as::<_, Device>(&format!(
        r#"
        INSERT INTO devices ({DEVICE_COLUMNS})
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(device_key) DO UPDATE SET
            last_known_address = excluded.last_known_address,
            gatt_signature = COALESCE(excluded.gatt_signature, devices.gatt_signature),
            name = COALESCE(excluded.name, devices.name),
            times_seen = devices.times_seen + excluded.times_seen,
            last_seen_at = MAX(devices.last_seen_at, excluded.last_seen_at)
        RETURNING {DEVICE_COLUMNS}
        "#
    ))
    .bind(device_key)
    .bind(name)
    .bind(raw_address)
    .bind(gatt_signature)
    .bind(sightings)
    .bind(seen_at)
    .bind(seen_at)
    .fetch_one(&mut *conn)
    .await?;

    Ok(device)
}

#[async_trait]
impl DeviceLookup for SightingStore {
    async fn find_by_address(&self, address: &str) -> Result<Option<Device>> {
        self.find_device_by_address(address).await
    }

    async fn find_by_signature(&self, signature: &str) -> Result<Option<Device>> {
        self.find_device_by_signature(signature).await
    }
}
