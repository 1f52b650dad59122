//! Place persistence

use super::SightingStore;
use crate::place_linker::{validate_radius, PlaceDirectory};
use async_trait::async_trait;
use swivel_common::db::{Coordinate, Place};
use swivel_common::{time, Error, Result};

const PLACE_COLUMNS: &str = "place_id, name, latitude, longitude, radius_meters, created_at, last_seen_at";

impl SightingStore {
    /// Create a place; `name` may be None for an anonymous place
    pub async fn create_place(&self, name: Option<&str>, center: Coordinate, radius_meters: f64) -> Result<Place> {
        let radius_meters = validate_radius(radius_meters)?;

        let place = sqlx::query_as::<_, Place>(&format!(
            r#"
            INSERT INTO places (name, latitude, longitude, radius_meters, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING {PLACE_COLUMNS}
            "#
        ))
        .bind(name)
        .bind(center.latitude)
        .bind(center.longitude)
        .bind(radius_meters)
        .bind(time::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(place)
    }

    pub async fn get_place(&self, place_id: i64) -> Result<Option<Place>> {
        let place = sqlx::query_as::<_, Place>(&format!("SELECT {PLACE_COLUMNS} FROM places WHERE place_id = ?"))
            .bind(place_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(place)
    }

    /// All places, named ones first in name order, then by id
    pub async fn list_places(&self) -> Result<Vec<Place>> {
        let places = sqlx::query_as::<_, Place>(&format!(
            "SELECT {PLACE_COLUMNS} FROM places ORDER BY name IS NULL, name, place_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(places)
    }

    /// Assign a name to a place (None clears it)
    pub async fn rename_place(&self, place_id: i64, name: Option<&str>) -> Result<Place> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());

        sqlx::query_as::<_, Place>(&format!(
            "UPDATE places SET name = ? WHERE place_id = ? RETURNING {PLACE_COLUMNS}"
        ))
        .bind(name)
        .bind(place_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("place {}", place_id)))
    }
}

#[async_trait]
impl PlaceDirectory for SightingStore {
    async fn known_places(&self) -> Result<Vec<Place>> {
        self.list_places().await
    }

    async fn create_place(&self, name: Option<&str>, center: Coordinate, radius_meters: f64) -> Result<Place> {
        SightingStore::create_place(self, name, center, radius_meters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;
    use swivel_common::db::init::create_schema;

    async fn setup_store() -> SightingStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_schema(&pool).await.unwrap();
        SightingStore::new(pool)
    }

    #[tokio::test]
    async fn test_create_and_list_places() {
        let store = setup_store().await;

        let anon = store.create_place(None, Coordinate::new(1.0, 2.0), 50.0).await.unwrap();
        let home = store.create_place(Some("Home"), Coordinate::new(3.0, 4.0), 25.0).await.unwrap();
        assert!(anon.last_seen_at.is_none());

        let places = store.list_places().await.unwrap();
        assert_eq!(places.iter().map(|p| p.place_id).collect::<Vec<_>>(), vec![home.place_id, anon.place_id]);
        assert_eq!(store.get_place(home.place_id).await.unwrap(), Some(home));
    }

    #[tokio::test]
    async fn test_create_place_rejects_bad_radius() {
        let store = setup_store().await;
        let err = store.create_place(None, Coordinate::new(0.0, 0.0), -1.0).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_rename_place() {
        let store = setup_store().await;
        let place = store.create_place(None, Coordinate::new(1.0, 2.0), 50.0).await.unwrap();

        let renamed = store.rename_place(place.place_id, Some("  Office ")).await.unwrap();
        assert_eq!(renamed.name.as_deref(), Some("Office"));

        let cleared = store.rename_place(place.place_id, Some("")).await.unwrap();
        assert_eq!(cleared.name, None);

        let err = store.rename_place(9999, Some("Nowhere")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
