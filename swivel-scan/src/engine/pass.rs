//! One discovery pass

use super::EngineInner;
use crate::db::NewSighting;
use crate::error::{RadioError, Result, ScanError};
use crate::identity::IdentityMatch;
use crate::location::LocationProvider;
use crate::radio::Observation;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::Ordering;
use swivel_common::db::Coordinate;
use swivel_common::events::SwivelEvent;
use swivel_common::time;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// What happened to one observation
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationOutcome {
    pub device_key: String,
    pub matched: IdentityMatch,
    pub place_id: Option<i64>,
    pub place_created: bool,
    pub relocated: bool,
}

/// Counters for one pass, logged when the pass ends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    /// 1-based pass number
    pub pass: u64,
    pub discovered: usize,
    pub recorded: usize,
    pub new_devices: usize,
    pub reidentified: usize,
    /// Placed, and not at a different place than last time
    pub same_place: usize,
    pub unplaced: usize,
    pub places_created: usize,
    pub relocated: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
}

impl PassSummary {
    fn record(&mut self, outcome: &ObservationOutcome) {
        self.recorded += 1;
        match outcome.matched {
            IdentityMatch::New => self.new_devices += 1,
            IdentityMatch::Reidentified { .. } => self.reidentified += 1,
            IdentityMatch::Address => {}
        }
        if outcome.place_created {
            self.places_created += 1;
        }
        match outcome.place_id {
            None => self.unplaced += 1,
            Some(_) if outcome.relocated => self.relocated += 1,
            Some(_) => self.same_place += 1,
        }
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pass {}: {} discovered, {} recorded ({} new, {} re-identified), \
             {} same place, {} relocated, {} unplaced, {} places created, {} failed in {}ms",
            self.pass,
            self.discovered,
            self.recorded,
            self.new_devices,
            self.reidentified,
            self.same_place,
            self.relocated,
            self.unplaced,
            self.places_created,
            self.failed,
            self.elapsed_ms
        )
    }
}

impl EngineInner {
    /// Discover, then resolve, place and record each observation in turn
    ///
    /// Per-device store failures are logged and the pass continues. An
    /// unavailable store aborts the pass with the error.
    pub(super) async fn run_pass(&self) -> Result<PassSummary> {
        let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();

        let observations = self.discover().await?;
        let mut summary = PassSummary {
            pass,
            discovered: observations.len(),
            ..Default::default()
        };

        for (index, observation) in observations.iter().enumerate() {
            match self.process_observation(observation).await {
                Ok(outcome) => summary.record(&outcome),
                Err(e) if e.is_unavailable() => {
                    summary.failed += 1;
                    error!(
                        "Store unavailable, pass {} aborted with {} observations unprocessed: {}",
                        pass,
                        observations.len() - index - 1,
                        e
                    );
                    return Err(ScanError::Store(e));
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(address = %observation.address, "Failed to record sighting: {}", e);
                }
            }
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!("Scan {}", summary);
        Ok(summary)
    }

    async fn discover(&self) -> std::result::Result<Vec<Observation>, RadioError> {
        let timeout = self.settings.discovery_timeout();
        match tokio::time::timeout(timeout, self.radio.discover(timeout)).await {
            Ok(result) => result,
            Err(_) => Err(RadioError::Timeout(timeout)),
        }
    }

    async fn current_coordinate(&self) -> Option<Coordinate> {
        let timeout = self.settings.location_timeout();
        match tokio::time::timeout(timeout, self.location.current_coordinate()).await {
            Ok(coordinate) => coordinate,
            Err(_) => {
                warn!("Location lookup timed out after {:?}", timeout);
                None
            }
        }
    }

    async fn process_observation(&self, observation: &Observation) -> swivel_common::Result<ObservationOutcome> {
        let resolution = self
            .resolver
            .resolve(&self.store, &observation.address, observation.service_ids.as_slice())
            .await?;

        let coordinate = self.current_coordinate().await;
        let link = self.linker.link(&self.store, coordinate).await?;
        let observed_at = time::now();

        if let Some(link) = link.as_ref().filter(|l| l.created) {
            self.bus.publish(SwivelEvent::PlaceCreated {
                place_id: link.place.place_id,
                latitude: link.place.latitude,
                longitude: link.place.longitude,
                radius_meters: link.place.radius_meters,
                timestamp: link.place.created_at,
            });
        }

        let place_id = link.as_ref().map(|l| l.place_id());
        let recorded = self
            .store
            .record_sighting(NewSighting {
                device_key: &resolution.device_key,
                name: observation.local_name.as_deref(),
                place_id,
                rssi: observation.rssi,
                raw_address: &resolution.address,
                gatt_signature: resolution.gatt_signature.as_deref(),
                timestamp: observed_at,
            })
            .await?;
        let device = &recorded.device;

        if let (Some(previous_address), Some(signature)) =
            (resolution.previous_address(), resolution.gatt_signature.as_ref())
        {
            info!(
                "Re-identified device {} ({} -> {})",
                device.device_key, previous_address, resolution.address
            );
            self.bus.publish(SwivelEvent::DeviceReidentified {
                device_key: device.device_key.clone(),
                previous_address: previous_address.to_string(),
                new_address: resolution.address.clone(),
                gatt_signature: signature.clone(),
                timestamp: observed_at,
            });
        }

        self.bus.publish(SwivelEvent::DeviceObserved {
            device_key: device.device_key.clone(),
            address: resolution.address.clone(),
            name: device.name.clone(),
            rssi: observation.rssi,
            place_id,
            gatt_signature: resolution.gatt_signature.clone(),
            timestamp: observed_at,
        });

        if let Some(relocation) = &recorded.relocation {
            info!(
                "Device {} moved from place {} to place {}",
                device.device_key, relocation.from_place_id, relocation.to_place_id
            );
            self.bus.publish(SwivelEvent::DeviceRelocated {
                device_key: device.device_key.clone(),
                from_place_id: relocation.from_place_id,
                to_place_id: relocation.to_place_id,
                timestamp: relocation.timestamp,
            });
        }

        Ok(ObservationOutcome {
            device_key: recorded.device.device_key,
            matched: resolution.matched,
            place_id,
            place_created: link.map(|l| l.created).unwrap_or(false),
            relocated: recorded.relocation.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(matched: IdentityMatch, place_id: Option<i64>, place_created: bool, relocated: bool) -> ObservationOutcome {
        ObservationOutcome {
            device_key: "k".to_string(),
            matched,
            place_id,
            place_created,
            relocated,
        }
    }

    #[test]
    fn test_summary_counts_outcomes() {
        let mut summary = PassSummary {
            pass: 4,
            discovered: 5,
            ..Default::default()
        };
        summary.record(&outcome(IdentityMatch::New, Some(1), true, false));
        summary.record(&outcome(IdentityMatch::Address, Some(1), false, false));
        summary.record(&outcome(
            IdentityMatch::Reidentified {
                previous_address: "AA".to_string(),
            },
            Some(2),
            true,
            true,
        ));
        summary.record(&outcome(IdentityMatch::Address, None, false, false));

        assert_eq!(summary.recorded, 4);
        assert_eq!(summary.new_devices, 1);
        assert_eq!(summary.reidentified, 1);
        assert_eq!(summary.places_created, 2);
        assert_eq!(summary.same_place, 2);
        assert_eq!(summary.relocated, 1);
        assert_eq!(summary.unplaced, 1);
    }

    #[test]
    fn test_summary_display() {
        let summary = PassSummary {
            pass: 2,
            discovered: 3,
            recorded: 2,
            failed: 1,
            ..Default::default()
        };
        let text = summary.to_string();
        assert!(text.starts_with("pass 2: 3 discovered, 2 recorded"));
        assert!(text.contains("1 failed"));
    }
}
