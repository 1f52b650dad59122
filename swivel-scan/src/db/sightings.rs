//! Sighting persistence
//!
//! Recording a sighting is one transaction covering the device row, the
//! sighting row, the device/place link, the place's last-seen time and,
//! when the device changed place, a relocation row.

use super::devices::write_device;
use super::SightingStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use swivel_common::db::{Device, DevicePlaceLink, Relocation, Sighting};
use swivel_common::Result;
use tracing::debug;

const SIGHTING_COLUMNS: &str = "sighting_id, device_key, place_id, timestamp, rssi, raw_address, gatt_signature_at_time";
const LINK_COLUMNS: &str = "device_key, place_id, times_seen, first_seen_at, last_seen_at";

/// Sighting to be recorded, along with what it says about the device
#[derive(Debug, Clone)]
pub struct NewSighting<'a> {
    pub device_key: &'a str,
    /// Advertised local name, if any
    pub name: Option<&'a str>,
    pub place_id: Option<i64>,
    pub rssi: i32,
    pub raw_address: &'a str,
    pub gatt_signature: Option<&'a str>,
    pub timestamp: DateTime<Utc>,
}

/// Rows written by [`SightingStore::record_sighting`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSighting {
    /// Device row after this sighting
    pub device: Device,
    pub sighting: Sighting,
    /// Updated link, when the sighting had a place
    pub link: Option<DevicePlaceLink>,
    /// Present when the previous placed sighting was at another place
    pub relocation: Option<Relocation>,
}

/// One signal strength reading
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RssiSample {
    pub timestamp: DateTime<Utc>,
    pub rssi: i32,
    pub place_id: Option<i64>,
}

impl SightingStore {
    /// Record a sighting, creating or updating its device
    ///
    /// The device row (address, signature, name, counters) is written in the
    /// same transaction as the sighting. All-or-nothing: on error nothing is
    /// written, including a changed `last_known_address`.
    pub async fn record_sighting(&self, new: NewSighting<'_>) -> Result<RecordedSighting> {
        let key = new.device_key;
        let _guard = self.locks.lock(key).await;

        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock from the start
        let device = write_device(
            &mut tx,
            key,
            new.raw_address,
            new.gatt_signature,
            new.name,
            new.timestamp,
            1,
        )
        .await?;

        let previous_place: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT place_id FROM sightings
            WHERE device_key = ? AND place_id IS NOT NULL
            ORDER BY timestamp DESC, sighting_id DESC
            LIMIT 1
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;

        let sighting = sqlx::query_as::<_, Sighting>(&format!(
            r#"
            INSERT INTO sightings (device_key, place_id, timestamp, rssi, raw_address, gatt_signature_at_time)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {SIGHTING_COLUMNS}
            "#
        ))
        .bind(key)
        .bind(new.place_id)
        .bind(new.timestamp)
        .bind(new.rssi)
        .bind(new.raw_address)
        .bind(new.gatt_signature)
        .fetch_one(&mut *tx)
        .await?;

        let mut link = None;
        let mut relocation = None;

        if let Some(place_id) = new.place_id {
            link = Some(
                sqlx::query_as::<_, DevicePlaceLink>(&format!(
                    r#"
                    INSERT INTO device_place_links ({LINK_COLUMNS})
                    VALUES (?, ?, 1, ?, ?)
                    ON CONFLICT(device_key, place_id) DO UPDATE SET
                        times_seen = device_place_links.times_seen + 1,
                        first_seen_at = MIN(device_place_links.first_seen_at, excluded.first_seen_at),
                        last_seen_at = MAX(device_place_links.last_seen_at, excluded.last_seen_at)
                    RETURNING {LINK_COLUMNS}
                    "#
                ))
                .bind(key)
                .bind(place_id)
                .bind(new.timestamp)
                .bind(new.timestamp)
                .fetch_one(&mut *tx)
                .await?,
            );

            sqlx::query("UPDATE places SET last_seen_at = MAX(COALESCE(last_seen_at, ?), ?) WHERE place_id = ?")
                .bind(new.timestamp)
                .bind(new.timestamp)
                .bind(place_id)
                .execute(&mut *tx)
                .await?;

            if let Some(from_place_id) = previous_place.filter(|prev| *prev != place_id) {
                relocation = Some(
                    sqlx::query_as::<_, Relocation>(
                        r#"
                        INSERT INTO relocations (device_key, from_place_id, to_place_id, timestamp)
                        VALUES (?, ?, ?, ?)
                        RETURNING relocation_id, device_key, from_place_id, to_place_id, timestamp
                        "#,
                    )
                    .bind(key)
                    .bind(from_place_id)
                    .bind(place_id)
                    .bind(new.timestamp)
                    .fetch_one(&mut *tx)
                    .await?,
                );
            }
        }

        tx.commit().await?;

        debug!(
            device_key = %key,
            sighting_id = sighting.sighting_id,
            place_id = ?new.place_id,
            relocated = relocation.is_some(),
            "Recorded sighting"
        );

        Ok(RecordedSighting {
            device,
            sighting,
            link,
            relocation,
        })
    }

    /// Sightings of a device in time order
    pub async fn sightings_for_device(&self, device_key: &str) -> Result<Vec<Sighting>> {
        let sightings = sqlx::query_as::<_, Sighting>(&format!(
            "SELECT {SIGHTING_COLUMNS} FROM sightings WHERE device_key = ? ORDER BY timestamp, sighting_id"
        ))
        .bind(device_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(sightings)
    }

    /// Signal strength over time for a device
    pub async fn rssi_history(&self, device_key: &str) -> Result<Vec<RssiSample>> {
        let samples = sqlx::query_as::<_, RssiSample>(
            "SELECT timestamp, rssi, place_id FROM sightings WHERE device_key = ? ORDER BY timestamp, sighting_id",
        )
        .bind(device_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(samples)
    }

    pub async fn links_for_device(&self, device_key: &str) -> Result<Vec<DevicePlaceLink>> {
        let links = sqlx::query_as::<_, DevicePlaceLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM device_place_links WHERE device_key = ? ORDER BY first_seen_at, place_id"
        ))
        .bind(device_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }

    pub async fn relocations_for_device(&self, device_key: &str) -> Result<Vec<Relocation>> {
        let relocations = sqlx::query_as::<_, Relocation>(
            r#"
            SELECT relocation_id, device_key, from_place_id, to_place_id, timestamp
            FROM relocations WHERE device_key = ? ORDER BY timestamp, relocation_id
            "#,
        )
        .bind(device_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(relocations)
    }

    /// Recompute every device/place link from the sightings table
    ///
    /// Returns the number of links written.
    pub async fn rebuild_links(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM device_place_links").execute(&mut *tx).await?;
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO device_place_links ({LINK_COLUMNS})
            SELECT device_key, place_id, COUNT(*), MIN(timestamp), MAX(timestamp)
            FROM sightings
            WHERE place_id IS NOT NULL
            GROUP BY device_key, place_id
            "#
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted.rows_affected())
    }
}
