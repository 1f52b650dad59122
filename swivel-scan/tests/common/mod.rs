//! Shared fakes for swivel-scan integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swivel_common::db::Coordinate;
use swivel_common::events::SwivelEvent;
use swivel_common::EventBus;
use swivel_scan::location::LocationProvider;
use swivel_scan::radio::{Observation, RadioDiscovery};
use swivel_scan::{RadioError, ScanEngine, ScanSettings, SightingStore};
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Radio answering from a script, then repeating a fallback batch
pub struct ScriptedRadio {
    script: Mutex<VecDeque<Result<Vec<Observation>, RadioError>>>,
    fallback: Vec<Observation>,
}

impl ScriptedRadio {
    pub fn new(script: Vec<Result<Vec<Observation>, RadioError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Vec::new(),
        }
    }

    pub fn repeating(batch: Vec<Observation>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: batch,
        }
    }

    pub fn push(&self, answer: Result<Vec<Observation>, RadioError>) {
        self.script.lock().unwrap().push_back(answer);
    }
}

#[async_trait]
impl RadioDiscovery for ScriptedRadio {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<Observation>, RadioError> {
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// Location the test moves around
#[derive(Default)]
pub struct MovableLocation {
    current: Mutex<Option<Coordinate>>,
}

impl MovableLocation {
    pub fn set(&self, coordinate: Option<Coordinate>) {
        *self.current.lock().unwrap() = coordinate;
    }
}

#[async_trait]
impl LocationProvider for MovableLocation {
    async fn current_coordinate(&self) -> Option<Coordinate> {
        *self.current.lock().unwrap()
    }
}

/// Radio whose discovery never completes
pub struct StalledRadio;

#[async_trait]
impl RadioDiscovery for StalledRadio {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<Observation>, RadioError> {
        std::future::pending().await
    }
}

/// Location provider that never answers
pub struct StalledLocation;

#[async_trait]
impl LocationProvider for StalledLocation {
    async fn current_coordinate(&self) -> Option<Coordinate> {
        std::future::pending().await
    }
}

/// Settings with short timings and no location caching
pub fn fast_settings() -> ScanSettings {
    ScanSettings {
        scan_interval_ms: 10,
        discovery_timeout_ms: 1000,
        location_timeout_ms: 1000,
        report_every_passes: 0,
        location_cache_secs: 0,
        ..ScanSettings::default()
    }
}

pub struct Harness {
    pub engine: ScanEngine,
    pub store: SightingStore,
    pub radio: Arc<ScriptedRadio>,
    pub location: Arc<MovableLocation>,
    pub events: broadcast::Receiver<SwivelEvent>,
    _dir: TempDir,
}

impl Harness {
    pub async fn new(settings: ScanSettings, radio: ScriptedRadio) -> Self {
        let radio = Arc::new(radio);
        let location = Arc::new(MovableLocation::default());
        Self::with_providers(settings, radio.clone(), location.clone(), radio, location).await
    }

    /// Harness whose engine talks to `engine_radio` and `engine_location`
    /// instead of the scripted fakes
    pub async fn with_providers(
        settings: ScanSettings,
        engine_radio: Arc<dyn RadioDiscovery>,
        engine_location: Arc<dyn LocationProvider>,
        radio: Arc<ScriptedRadio>,
        location: Arc<MovableLocation>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let store = SightingStore::open(&dir.path().join("swivel.db")).await.unwrap();
        let bus = EventBus::new(1024);
        let events = bus.stream();

        let engine = ScanEngine::new(settings, store.clone(), bus, engine_radio, engine_location);

        Self {
            engine,
            store,
            radio,
            location,
            events,
            _dir: dir,
        }
    }

    /// Harness over a radio that never answers
    pub async fn stalled_radio(settings: ScanSettings) -> Self {
        Self::with_providers(
            settings,
            Arc::new(StalledRadio),
            Arc::new(MovableLocation::default()),
            Arc::new(ScriptedRadio::new(Vec::new())),
            Arc::new(MovableLocation::default()),
        )
        .await
    }

    /// Harness over a location provider that never answers
    pub async fn stalled_location(settings: ScanSettings, radio: ScriptedRadio) -> Self {
        let radio = Arc::new(radio);
        Self::with_providers(
            settings,
            radio.clone(),
            Arc::new(StalledLocation),
            radio,
            Arc::new(MovableLocation::default()),
        )
        .await
    }

    /// Events published so far
    pub fn drain_events(&mut self) -> Vec<SwivelEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn observe(address: &str, rssi: i32, services: &[&str]) -> Observation {
    Observation::new(address, rssi).with_services(services.iter().copied())
}
