//! Report queries
//!
//! Each report reads inside one transaction so it reflects a single
//! consistent state, even while sightings are being recorded.

use super::SightingStore;
use serde::Serialize;
use sqlx::{FromRow, Row};
use std::collections::{BTreeMap, HashMap};
use swivel_common::db::{Device, DevicePlaceLink, Place, Sighting};
use swivel_common::Result;

/// A device seen at a place, with its link counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedDevice {
    pub device: Device,
    pub link: DevicePlaceLink,
}

/// A place and every device ever linked to it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceReport {
    pub place: Place,
    /// Most recently seen first
    pub devices: Vec<PlacedDevice>,
}

/// One place a device has visited
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceVisit {
    pub place: Place,
    pub link: DevicePlaceLink,
}

/// A device linked to more than one place
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DevicePlaces {
    pub device: Device,
    /// In order of first visit
    pub visits: Vec<PlaceVisit>,
}

const MULTI_PLACE_KEYS: &str =
    "SELECT device_key FROM device_place_links GROUP BY device_key HAVING COUNT(DISTINCT place_id) > 1";

impl SightingStore {
    /// Every place with the devices seen there
    pub async fn report_places_and_devices(&self) -> Result<Vec<PlaceReport>> {
        let mut tx = self.pool.begin().await?;

        let places = sqlx::query_as::<_, Place>(
            r#"
            SELECT place_id, name, latitude, longitude, radius_meters, created_at, last_seen_at
            FROM places
            ORDER BY name IS NULL, name, place_id
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT d.device_key, d.name, d.last_known_address, d.gatt_signature,
                   d.times_seen, d.first_seen_at, d.last_seen_at,
                   l.place_id AS link_place_id,
                   l.times_seen AS link_times_seen,
                   l.first_seen_at AS link_first_seen_at,
                   l.last_seen_at AS link_last_seen_at
            FROM device_place_links l
            JOIN devices d ON d.device_key = l.device_key
            ORDER BY l.place_id, d.last_seen_at DESC, d.device_key
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut by_place: HashMap<i64, Vec<PlacedDevice>> = HashMap::new();
        for row in rows {
            let placed = placed_device_from_row(&row)?;
            by_place.entry(placed.link.place_id).or_default().push(placed);
        }

        Ok(places
            .into_iter()
            .map(|place| PlaceReport {
                devices: by_place.remove(&place.place_id).unwrap_or_default(),
                place,
            })
            .collect())
    }

    /// Devices linked to two or more distinct places
    pub async fn report_multi_place_devices(&self) -> Result<Vec<DevicePlaces>> {
        let mut tx = self.pool.begin().await?;

        let devices = sqlx::query_as::<_, Device>(&format!(
            r#"
            SELECT device_key, name, last_known_address, gatt_signature, times_seen, first_seen_at, last_seen_at
            FROM devices
            WHERE device_key IN ({MULTI_PLACE_KEYS})
            ORDER BY last_seen_at DESC, device_key
            "#
        ))
        .fetch_all(&mut *tx)
        .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT p.place_id, p.name, p.latitude, p.longitude, p.radius_meters, p.created_at, p.last_seen_at,
                   l.device_key AS link_device_key,
                   l.times_seen AS link_times_seen,
                   l.first_seen_at AS link_first_seen_at,
                   l.last_seen_at AS link_last_seen_at
            FROM device_place_links l
            JOIN places p ON p.place_id = l.place_id
            WHERE l.device_key IN ({MULTI_PLACE_KEYS})
            ORDER BY l.device_key, l.first_seen_at, p.place_id
            "#
        ))
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut by_device: HashMap<String, Vec<PlaceVisit>> = HashMap::new();
        for row in rows {
            let place = Place::from_row(&row)?;
            let link = DevicePlaceLink {
                device_key: row.try_get("link_device_key")?,
                place_id: place.place_id,
                times_seen: row.try_get("link_times_seen")?,
                first_seen_at: row.try_get("link_first_seen_at")?,
                last_seen_at: row.try_get("link_last_seen_at")?,
            };
            by_device
                .entry(link.device_key.clone())
                .or_default()
                .push(PlaceVisit { place, link });
        }

        Ok(devices
            .into_iter()
            .map(|device| DevicePlaces {
                visits: by_device.remove(&device.device_key).unwrap_or_default(),
                device,
            })
            .collect())
    }

    /// Historical sightings grouped by the GATT signature they carried,
    /// for signatures seen at more than one place
    ///
    /// Works on the signature recorded at sighting time, so it also shows
    /// groups that identity resolution has since attributed to different
    /// device keys.
    pub async fn report_multi_place_by_gatt_signature(&self) -> Result<BTreeMap<String, Vec<Sighting>>> {
        let sightings = sqlx::query_as::<_, Sighting>(
            r#"
            SELECT sighting_id, device_key, place_id, timestamp, rssi, raw_address, gatt_signature_at_time
            FROM sightings
            WHERE gatt_signature_at_time IN (
                SELECT gatt_signature_at_time FROM sightings
                WHERE gatt_signature_at_time IS NOT NULL
                GROUP BY gatt_signature_at_time
                HAVING COUNT(DISTINCT place_id) > 1
            )
            ORDER BY gatt_signature_at_time, timestamp, sighting_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut groups: BTreeMap<String, Vec<Sighting>> = BTreeMap::new();
        for sighting in sightings {
            if let Some(signature) = sighting.gatt_signature_at_time.clone() {
                groups.entry(signature).or_default().push(sighting);
            }
        }
        Ok(groups)
    }
}

fn placed_device_from_row(row: &sqlx::sqlite::SqliteRow) -> std::result::Result<PlacedDevice, sqlx::Error> {
    let device = Device::from_row(row)?;
    let link = DevicePlaceLink {
        device_key: device.device_key.clone(),
        place_id: row.try_get("link_place_id")?,
        times_seen: row.try_get("link_times_seen")?,
        first_seen_at: row.try_get("link_first_seen_at")?,
        last_seen_at: row.try_get("link_last_seen_at")?,
    };
    Ok(PlacedDevice { device, link })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewSighting;
    use chrono::{Duration, Utc};
    use sqlx::SqlitePool;
    use swivel_common::db::init::create_schema;
    use swivel_common::db::Coordinate;

    async fn setup_store() -> SightingStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_schema(&pool).await.unwrap();
        SightingStore::new(pool)
    }

    async fn sight(store: &SightingStore, key: &str, signature: Option<&str>, place_id: Option<i64>, offset: i64) {
        store
            .record_sighting(NewSighting {
                device_key: key,
                name: None,
                place_id,
                rssi: -55,
                raw_address: key,
                gatt_signature: signature,
                timestamp: Utc::now() + Duration::seconds(offset),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_store_reports_are_empty() {
        let store = setup_store().await;
        assert!(store.report_places_and_devices().await.unwrap().is_empty());
        assert!(store.report_multi_place_devices().await.unwrap().is_empty());
        assert!(store.report_multi_place_by_gatt_signature().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_places_report_includes_empty_places() {
        let store = setup_store().await;
        let home = store.create_place(Some("Home"), Coordinate::new(1.0, 1.0), 50.0).await.unwrap();
        let empty = store.create_place(None, Coordinate::new(5.0, 5.0), 50.0).await.unwrap();

        sight(&store, "a", None, Some(home.place_id), 0).await;
        sight(&store, "b", None, Some(home.place_id), 1).await;

        let report = store.report_places_and_devices().await.unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].place.place_id, home.place_id);
        let keys: Vec<&str> = report[0].devices.iter().map(|d| d.device.device_key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(report[1].place.place_id, empty.place_id);
        assert!(report[1].devices.is_empty());
    }

    #[tokio::test]
    async fn test_multi_place_devices() {
        let store = setup_store().await;
        let a = store.create_place(None, Coordinate::new(1.0, 1.0), 50.0).await.unwrap();
        let b = store.create_place(None, Coordinate::new(2.0, 2.0), 50.0).await.unwrap();

        sight(&store, "mover", None, Some(a.place_id), 0).await;
        sight(&store, "mover", None, Some(b.place_id), 1).await;
        sight(&store, "homebody", None, Some(a.place_id), 2).await;
        sight(&store, "homebody", None, Some(a.place_id), 3).await;

        let report = store.report_multi_place_devices().await.unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].device.device_key, "mover");
        let places: Vec<i64> = report[0].visits.iter().map(|v| v.place.place_id).collect();
        assert_eq!(places, vec![a.place_id, b.place_id]);
    }

    #[tokio::test]
    async fn test_gatt_groups_span_device_keys() {
        let store = setup_store().await;
        let a = store.create_place(None, Coordinate::new(1.0, 1.0), 50.0).await.unwrap();
        let b = store.create_place(None, Coordinate::new(2.0, 2.0), 50.0).await.unwrap();

        // Same signature recorded under two keys at two places
        sight(&store, "k1", Some("shared"), Some(a.place_id), 0).await;
        sight(&store, "k2", Some("shared"), Some(b.place_id), 1).await;
        // Single place only
        sight(&store, "k3", Some("local"), Some(a.place_id), 2).await;
        sight(&store, "k3", Some("local"), Some(a.place_id), 3).await;
        // Unplaced sightings do not count as a place
        sight(&store, "k4", Some("roamer"), None, 4).await;
        sight(&store, "k4", Some("roamer"), Some(a.place_id), 5).await;

        let groups = store.report_multi_place_by_gatt_signature().await.unwrap();
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["shared"]);
        let keys: Vec<&str> = groups["shared"].iter().map(|s| s.device_key.as_str()).collect();
        assert_eq!(keys, vec!["k1", "k2"]);
    }
}
