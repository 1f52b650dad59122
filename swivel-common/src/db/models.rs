//! Sighting record model
//!
//! Row types for the four core tables (devices, places, sightings,
//! device_place_links) plus the relocation history. Field absence (no GATT
//! signature, no resolved place, no advertised name) is modelled with
//! `Option`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for great-circle distances
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Default radius of an anonymous place created from a single fix
pub const DEFAULT_PLACE_RADIUS_M: f64 = 50.0;

/// A tracked physical radio endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    /// Stable correlation key; never changes once assigned
    pub device_key: String,
    /// Advertised local name, when the device broadcasts one
    pub name: Option<String>,
    /// Most recently observed hardware address (rotates)
    pub last_known_address: String,
    /// Fingerprint of the advertised service set
    pub gatt_signature: Option<String>,
    /// Number of recorded sightings
    pub times_seen: i64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Device {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown Device")
    }
}

/// A named or anonymous circular region used to attribute sightings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Place {
    pub place_id: i64,
    /// None until resolved or user-assigned
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
    pub created_at: DateTime<Utc>,
    /// Most recent sighting attributed to this place
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Place {
    pub fn center(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Whether the coordinate falls inside this place's circle
    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        self.center().distance_meters(coordinate) <= self.radius_meters
    }

    /// Name for reports: the assigned name or the center coordinate
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("Unnamed Place ({}, {})", self.latitude, self.longitude),
        }
    }
}

/// One immutable observation of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sighting {
    pub sighting_id: i64,
    pub device_key: String,
    /// None when no coordinate could be resolved
    pub place_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub rssi: i32,
    /// Address as observed at that instant
    pub raw_address: String,
    pub gatt_signature_at_time: Option<String>,
}

/// Materialized aggregate of a device's sightings at one place
///
/// Recomputable by replaying sightings; maintained incrementally on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DevicePlaceLink {
    pub device_key: String,
    pub place_id: i64,
    pub times_seen: i64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// A device observed at a different place than its previous placed sighting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Relocation {
    pub relocation_id: i64,
    pub device_key: String,
    pub from_place_id: i64,
    pub to_place_id: i64,
    pub timestamp: DateTime<Utc>,
}

/// A WGS84 position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Haversine great-circle distance in meters
    pub fn distance_meters(&self, other: &Coordinate) -> f64 {
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        // Clamp guards asin against rounding just above 1.0 for antipodal points
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_RADIUS_M * c
    }
}
