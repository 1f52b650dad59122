//! Radio discovery capability
//!
//! The engine depends only on [`RadioDiscovery`]. Platform radio stacks plug
//! in behind it; [`ReplayRadio`] feeds recorded observations, one JSON array
//! of observations per line, one line per discovery pass.

use crate::error::{RadioError, ScanError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One device seen during a discovery pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Hardware address as reported (may be randomized)
    pub address: String,
    /// Signal strength in dBm
    pub rssi: i32,
    /// Advertised service UUIDs; empty when none were advertised
    #[serde(default)]
    pub service_ids: Vec<String>,
    /// Advertised local name
    #[serde(default)]
    pub local_name: Option<String>,
}

impl Observation {
    pub fn new(address: impl Into<String>, rssi: i32) -> Self {
        Self {
            address: address.into(),
            rssi,
            service_ids: Vec::new(),
            local_name: None,
        }
    }

    pub fn with_services<S: Into<String>>(mut self, services: impl IntoIterator<Item = S>) -> Self {
        self.service_ids = services.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }
}

/// Discovers nearby devices
#[async_trait]
pub trait RadioDiscovery: Send + Sync {
    /// Run one discovery window, returning within `timeout`
    ///
    /// Zero observations is a valid result.
    async fn discover(&self, timeout: Duration) -> Result<Vec<Observation>, RadioError>;
}

/// Replays recorded discovery passes
pub struct ReplayRadio {
    batches: Mutex<VecDeque<Vec<Observation>>>,
}

impl ReplayRadio {
    pub fn from_batches(batches: Vec<Vec<Observation>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
        }
    }

    /// Parse JSON lines; blank lines and `#` comments are skipped
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ScanError> {
        let mut batches = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| ScanError::Replay(format!("line {}: {}", index + 1, e)))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let batch: Vec<Observation> =
                serde_json::from_str(line).map_err(|e| ScanError::Replay(format!("line {}: {}", index + 1, e)))?;
            batches.push(batch);
        }
        Ok(Self::from_batches(batches))
    }

    pub fn from_file(path: &Path) -> Result<Self, ScanError> {
        let file = std::fs::File::open(path)
            .map_err(|e| ScanError::Replay(format!("Failed to open {}: {}", path.display(), e)))?;
        let radio = Self::from_reader(std::io::BufReader::new(file))?;
        info!("Loaded replay file {}", path.display());
        Ok(radio)
    }

    /// Passes left to replay
    pub async fn remaining(&self) -> usize {
        self.batches.lock().await.len()
    }
}

#[async_trait]
impl RadioDiscovery for ReplayRadio {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<Observation>, RadioError> {
        let batch = self.batches.lock().await.pop_front().unwrap_or_default();
        debug!("Replaying {} observations", batch.len());
        Ok(batch)
    }
}
