//! Event types for the Swivel event system
//!
//! Provides the shared event definitions and the topic EventBus.

mod bus;
mod scanner_types;

pub use bus::{EventBus, EventHandler, HandlerError, HandlerResult, SubscriptionId};
pub use scanner_types::{ReportCounts, ScannerState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Topics an EventBus subscriber can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// `device.observed`
    DeviceObserved,
    /// `device.reidentified`
    DeviceReidentified,
    /// `place.created`
    PlaceCreated,
    /// `device.relocated`
    DeviceRelocated,
    /// `scanner.state_changed`
    ScannerStateChanged,
    /// `scanner.error`
    ScannerError,
    /// `report.generated`
    ReportGenerated,
}

impl Topic {
    /// Dotted wire name of the topic
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::DeviceObserved => "device.observed",
            Topic::DeviceReidentified => "device.reidentified",
            Topic::PlaceCreated => "place.created",
            Topic::DeviceRelocated => "device.relocated",
            Topic::ScannerStateChanged => "scanner.state_changed",
            Topic::ScannerError => "scanner.error",
            Topic::ReportGenerated => "report.generated",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Swivel event types
///
/// Events are published via EventBus and can be serialized for stream
/// consumers. Every variant belongs to exactly one [`Topic`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SwivelEvent {
    /// A sighting was recorded for a device
    DeviceObserved {
        device_key: String,
        /// Address as observed
        address: String,
        name: Option<String>,
        rssi: i32,
        /// None when no coordinate was available
        place_id: Option<i64>,
        gatt_signature: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A new address was merged into an existing device by signature match
    DeviceReidentified {
        device_key: String,
        previous_address: String,
        new_address: String,
        gatt_signature: String,
        timestamp: DateTime<Utc>,
    },

    /// An anonymous place was created for an unmatched coordinate
    PlaceCreated {
        place_id: i64,
        latitude: f64,
        longitude: f64,
        radius_meters: f64,
        timestamp: DateTime<Utc>,
    },

    /// A device was seen at a different place than its previous placed sighting
    DeviceRelocated {
        device_key: String,
        from_place_id: i64,
        to_place_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Scan engine lifecycle transition
    ScannerStateChanged {
        old_state: ScannerState,
        new_state: ScannerState,
        timestamp: DateTime<Utc>,
    },

    /// The scan loop hit a condition it reports to the operator
    ScannerError {
        message: String,
        /// True when the loop is stopping because of it
        fatal: bool,
        timestamp: DateTime<Utc>,
    },

    /// Periodic reports finished
    ReportGenerated {
        counts: ReportCounts,
        /// Pass number that triggered the run
        pass: u64,
        timestamp: DateTime<Utc>,
    },
}

impl SwivelEvent {
    /// Topic this event is published on
    pub fn topic(&self) -> Topic {
        match self {
            SwivelEvent::DeviceObserved { .. } => Topic::DeviceObserved,
            SwivelEvent::DeviceReidentified { .. } => Topic::DeviceReidentified,
            SwivelEvent::PlaceCreated { .. } => Topic::PlaceCreated,
            SwivelEvent::DeviceRelocated { .. } => Topic::DeviceRelocated,
            SwivelEvent::ScannerStateChanged { .. } => Topic::ScannerStateChanged,
            SwivelEvent::ScannerError { .. } => Topic::ScannerError,
            SwivelEvent::ReportGenerated { .. } => Topic::ReportGenerated,
        }
    }

    /// Get event type as string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SwivelEvent::DeviceObserved { .. } => "DeviceObserved",
            SwivelEvent::DeviceReidentified { .. } => "DeviceReidentified",
            SwivelEvent::PlaceCreated { .. } => "PlaceCreated",
            SwivelEvent::DeviceRelocated { .. } => "DeviceRelocated",
            SwivelEvent::ScannerStateChanged { .. } => "ScannerStateChanged",
            SwivelEvent::ScannerError { .. } => "ScannerError",
            SwivelEvent::ReportGenerated { .. } => "ReportGenerated",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SwivelEvent::DeviceObserved { timestamp, .. }
            | SwivelEvent::DeviceReidentified { timestamp, .. }
            | SwivelEvent::PlaceCreated { timestamp, .. }
            | SwivelEvent::DeviceRelocated { timestamp, .. }
            | SwivelEvent::ScannerStateChanged { timestamp, .. }
            | SwivelEvent::ScannerError { timestamp, .. }
            | SwivelEvent::ReportGenerated { timestamp, .. } => *timestamp,
        }
    }
}
