//! Scanner lifecycle types carried by events

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scan engine lifecycle state
///
/// `Idle → Scanning → (Paused | Stopping) → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScannerState {
    /// Constructed, not yet started
    Idle,
    /// Discovery passes running
    Scanning,
    /// Loop alive but not discovering
    Paused,
    /// Draining the in-flight pass
    Stopping,
    /// Loop finished
    Stopped,
}

impl ScannerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScannerState::Idle => "idle",
            ScannerState::Scanning => "scanning",
            ScannerState::Paused => "paused",
            ScannerState::Stopping => "stopping",
            ScannerState::Stopped => "stopped",
        }
    }

    /// Whether the scan loop task is alive in this state
    pub fn is_running(&self) -> bool {
        matches!(self, ScannerState::Scanning | ScannerState::Paused)
    }
}

impl fmt::Display for ScannerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row counts of one periodic report run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCounts {
    /// Places in the places-and-devices report
    pub places: usize,
    /// Devices linked to two or more places
    pub multi_place_devices: usize,
    /// GATT signatures sighted at two or more places
    pub multi_place_signatures: usize,
}
