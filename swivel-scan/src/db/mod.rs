//! Sighting store
//!
//! Durable storage for devices, places, sightings, device/place links and
//! relocations. Writes for one device key are serialized through
//! [`KeyedLocks`]; different keys proceed concurrently. Each write is a
//! single statement or a single transaction, so readers never observe a
//! sighting without its link update.

pub mod devices;
pub mod locks;
pub mod places;
pub mod reports;
pub mod sightings;

pub use locks::KeyedLocks;
pub use reports::{DevicePlaces, PlaceReport, PlaceVisit, PlacedDevice};
pub use sightings::{NewSighting, RecordedSighting, RssiSample};

use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use swivel_common::db::init::init_database;
use swivel_common::Result;

/// Handle to the sighting database
///
/// Cheap to clone; clones share the pool and the per-device locks.
#[derive(Clone)]
pub struct SightingStore {
    pool: SqlitePool,
    locks: Arc<KeyedLocks>,
}

/// Row counts across the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub devices: i64,
    pub places: i64,
    pub sightings: i64,
    pub relocations: i64,
}

impl SightingStore {
    /// Wrap an initialized pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Open (creating if needed) the database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(init_database(path).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let (devices, places, sightings, relocations): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM devices),
                (SELECT COUNT(*) FROM places),
                (SELECT COUNT(*) FROM sightings),
                (SELECT COUNT(*) FROM relocations)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            devices,
            places,
            sightings,
            relocations,
        })
    }
}
