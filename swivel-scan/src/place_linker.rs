//! Place attribution
//!
//! Assigns each sighting to the place containing the current coordinate,
//! creating an anonymous place centered on the coordinate when no existing
//! place contains it. With overlapping places the smallest radius wins,
//! then the most recently seen, then the oldest place id.

use async_trait::async_trait;
use std::cmp::Ordering;
use swivel_common::db::{Coordinate, Place, DEFAULT_PLACE_RADIUS_M};
use swivel_common::{Error, Result};
use tracing::{debug, info, warn};

/// Place storage needed by the linker
#[async_trait]
pub trait PlaceDirectory: Send + Sync {
    async fn known_places(&self) -> Result<Vec<Place>>;

    async fn create_place(&self, name: Option<&str>, center: Coordinate, radius_meters: f64) -> Result<Place>;
}

/// Place chosen for a sighting
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceLink {
    pub place: Place,
    /// True when the place was created for this sighting
    pub created: bool,
}

impl PlaceLink {
    pub fn place_id(&self) -> i64 {
        self.place.place_id
    }
}

/// Links coordinates to places
#[derive(Debug, Clone)]
pub struct PlaceLinker {
    default_radius_m: f64,
}

impl PlaceLinker {
    pub fn new(default_radius_m: f64) -> Self {
        let default_radius_m = if default_radius_m.is_finite() && default_radius_m > 0.0 {
            default_radius_m
        } else {
            DEFAULT_PLACE_RADIUS_M
        };
        Self { default_radius_m }
    }

    pub fn default_radius_m(&self) -> f64 {
        self.default_radius_m
    }

    /// Resolve the place for a sighting at `coordinate`
    ///
    /// `None` coordinate (location unavailable) or an out-of-range one
    /// yields `None`: the sighting is recorded without a place.
    pub async fn link(&self, directory: &dyn PlaceDirectory, coordinate: Option<Coordinate>) -> Result<Option<PlaceLink>> {
        let Some(coordinate) = coordinate else {
            return Ok(None);
        };

        if !is_valid(&coordinate) {
            warn!(
                "Ignoring out-of-range coordinate ({}, {})",
                coordinate.latitude, coordinate.longitude
            );
            return Ok(None);
        }

        let places = directory.known_places().await?;
        if let Some(place) = best_match(&places, &coordinate) {
            debug!(place_id = place.place_id, "Coordinate inside existing place");
            return Ok(Some(PlaceLink {
                place: place.clone(),
                created: false,
            }));
        }

        let place = directory.create_place(None, coordinate, self.default_radius_m).await?;
        info!(
            "Created place {} at ({}, {}) radius {}m",
            place.place_id, place.latitude, place.longitude, place.radius_meters
        );
        Ok(Some(PlaceLink { place, created: true }))
    }
}

impl Default for PlaceLinker {
    fn default() -> Self {
        Self::new(DEFAULT_PLACE_RADIUS_M)
    }
}

/// Most specific place containing the coordinate
pub fn best_match<'a>(places: &'a [Place], coordinate: &Coordinate) -> Option<&'a Place> {
    places
        .iter()
        .filter(|place| place.contains(coordinate))
        .min_by(|a, b| {
            a.radius_meters
                .partial_cmp(&b.radius_meters)
                .unwrap_or(Ordering::Equal)
                // None sorts first, so reverse for most-recent-first
                .then_with(|| b.last_seen_at.cmp(&a.last_seen_at))
                .then_with(|| a.place_id.cmp(&b.place_id))
        })
}

/// Check a radius supplied by a caller
pub fn validate_radius(radius_meters: f64) -> Result<f64> {
    if radius_meters.is_finite() && radius_meters > 0.0 {
        Ok(radius_meters)
    } else {
        Err(Error::InvalidInput(format!("Place radius must be positive, got {}", radius_meters)))
    }
}

fn is_valid(coordinate: &Coordinate) -> bool {
    coordinate.latitude.is_finite()
        && coordinate.longitude.is_finite()
        && (-90.0..=90.0).contains(&coordinate.latitude)
        && (-180.0..=180.0).contains(&coordinate.longitude)
}
