//! Report rendering
//!
//! Turns the store's report queries into human-readable lines for the log
//! and the CLI.

use crate::db::{DevicePlaces, PlaceReport, RssiSample, SightingStore};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use swivel_common::db::{Device, Place, Sighting};
use swivel_common::events::ReportCounts;
use swivel_common::Result;
use tracing::info;

/// All three periodic reports
#[derive(Debug, Clone, Serialize)]
pub struct ReportSet {
    pub places: Vec<PlaceReport>,
    pub multi_place_devices: Vec<DevicePlaces>,
    pub gatt_groups: BTreeMap<String, Vec<Sighting>>,
}

impl ReportSet {
    pub async fn generate(store: &SightingStore) -> Result<Self> {
        Ok(Self {
            places: store.report_places_and_devices().await?,
            multi_place_devices: store.report_multi_place_devices().await?,
            gatt_groups: store.report_multi_place_by_gatt_signature().await?,
        })
    }

    pub fn counts(&self) -> ReportCounts {
        ReportCounts {
            places: self.places.len(),
            multi_place_devices: self.multi_place_devices.len(),
            multi_place_signatures: self.gatt_groups.len(),
        }
    }

    /// Write every report to the log at info level
    pub fn log(&self) {
        let place_names = place_names(self.places.iter().map(|r| &r.place));

        for line in render_places(&self.places) {
            info!("{}", line);
        }
        for line in render_multi_place_devices(&self.multi_place_devices) {
            info!("{}", line);
        }
        for line in render_gatt_groups(&self.gatt_groups, &place_names) {
            info!("{}", line);
        }
    }
}

/// Display names keyed by place id
pub fn place_names<'a>(places: impl IntoIterator<Item = &'a Place>) -> HashMap<i64, String> {
    places.into_iter().map(|p| (p.place_id, p.display_name())).collect()
}

pub fn render_places(report: &[PlaceReport]) -> Vec<String> {
    let mut lines = vec![format!("Places and devices ({} places)", report.len())];
    for entry in report {
        lines.push(format!(
            "Place {}: {} radius {}m, {} devices",
            entry.place.place_id,
            entry.place.display_name(),
            entry.place.radius_meters,
            entry.devices.len()
        ));
        for placed in &entry.devices {
            lines.push(format!(
                "  {} ({}) seen {} times, last {}",
                placed.device.display_name(),
                placed.device.device_key,
                placed.link.times_seen,
                placed.link.last_seen_at.to_rfc3339()
            ));
        }
    }
    lines
}

pub fn render_multi_place_devices(report: &[DevicePlaces]) -> Vec<String> {
    let mut lines = vec![format!("Devices seen at multiple places ({})", report.len())];
    for entry in report {
        let places: Vec<String> = entry
            .visits
            .iter()
            .map(|v| format!("{} x{}", v.place.display_name(), v.link.times_seen))
            .collect();
        lines.push(format!(
            "Device: {} ({}), seen at {}",
            entry.device.display_name(),
            entry.device.device_key,
            places.join(", ")
        ));
    }
    lines
}

pub fn render_gatt_groups(groups: &BTreeMap<String, Vec<Sighting>>, place_names: &HashMap<i64, String>) -> Vec<String> {
    let mut lines = vec![format!("GATT signatures seen at multiple places ({})", groups.len())];
    for (signature, sightings) in groups {
        lines.push(format!("Signature {} ({} sightings)", short_signature(signature), sightings.len()));
        for sighting in sightings {
            let place = match sighting.place_id {
                Some(id) => place_names.get(&id).cloned().unwrap_or_else(|| format!("place {}", id)),
                None => "no place".to_string(),
            };
            lines.push(format!(
                "  {} {} as {} at {}",
                sighting.timestamp.to_rfc3339(),
                sighting.device_key,
                sighting.raw_address,
                place
            ));
        }
    }
    lines
}

pub fn render_rssi_history(device: &Device, samples: &[RssiSample]) -> Vec<String> {
    let mut lines = vec![format!(
        "RSSI history for {} ({}), {} samples",
        device.display_name(),
        device.device_key,
        samples.len()
    )];
    for sample in samples {
        let place = sample.place_id.map(|id| format!(" place {}", id)).unwrap_or_default();
        lines.push(format!("  {} {} dBm{}", sample.timestamp.to_rfc3339(), sample.rssi, place));
    }
    lines
}

fn short_signature(signature: &str) -> &str {
    signature.get(..12).unwrap_or(signature)
}
