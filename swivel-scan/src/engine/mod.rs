//! Scan engine
//!
//! Owns the discovery loop and its lifecycle:
//! `Idle → Scanning ⇄ Paused → Stopping → Stopped`.
//!
//! A pass is never interrupted: stop requests take effect between passes or
//! during the inter-pass sleep, so every discovered device reaches a
//! terminal outcome (recorded, or logged as failed).

mod pass;

pub use pass::{ObservationOutcome, PassSummary};

use crate::config::ScanSettings;
use crate::db::SightingStore;
use crate::error::{Result, ScanError};
use crate::identity::IdentityResolver;
use crate::location::{CachedLocation, LocationProvider};
use crate::place_linker::PlaceLinker;
use crate::radio::RadioDiscovery;
use crate::reports::ReportSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use swivel_common::events::{ReportCounts, ScannerState, SwivelEvent};
use swivel_common::{time, EventBus};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Continuous discovery engine
pub struct ScanEngine {
    inner: Arc<EngineInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct EngineInner {
    settings: ScanSettings,
    store: SightingStore,
    bus: EventBus,
    radio: Arc<dyn RadioDiscovery>,
    location: CachedLocation,
    resolver: IdentityResolver,
    linker: PlaceLinker,
    state: RwLock<ScannerState>,
    cancel: CancellationToken,
    resume: Notify,
    passes: AtomicU64,
}

impl ScanEngine {
    pub fn new(
        settings: ScanSettings,
        store: SightingStore,
        bus: EventBus,
        radio: Arc<dyn RadioDiscovery>,
        location: Arc<dyn LocationProvider>,
    ) -> Self {
        Self::with_resolver(settings, store, bus, radio, location, IdentityResolver::new())
    }

    pub fn with_resolver(
        settings: ScanSettings,
        store: SightingStore,
        bus: EventBus,
        radio: Arc<dyn RadioDiscovery>,
        location: Arc<dyn LocationProvider>,
        resolver: IdentityResolver,
    ) -> Self {
        let location = CachedLocation::new(location, settings.location_cache_ttl());
        let linker = PlaceLinker::new(settings.place_default_radius_m);

        Self {
            inner: Arc::new(EngineInner {
                settings,
                store,
                bus,
                radio,
                location,
                resolver,
                linker,
                state: RwLock::new(ScannerState::Idle),
                cancel: CancellationToken::new(),
                resume: Notify::new(),
                passes: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ScannerState {
        self.inner.state()
    }

    /// True while the loop is alive (scanning or paused)
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Passes completed or attempted so far
    pub fn passes(&self) -> u64 {
        self.inner.passes.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.inner.settings
    }

    pub fn store(&self) -> &SightingStore {
        &self.inner.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Spawn the scan loop (Idle → Scanning)
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if self.inner.transition(&[ScannerState::Idle], ScannerState::Scanning).is_none() {
            return Err(ScanError::InvalidState(format!("cannot start from {}", self.state())));
        }

        info!(
            "Starting scan loop (interval: {}ms, discovery timeout: {}ms)",
            self.inner.settings.scan_interval_ms, self.inner.settings.discovery_timeout_ms
        );

        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move { inner.scan_loop().await }));
        Ok(())
    }

    /// Suspend discovery after the current pass (Scanning → Paused)
    pub fn pause(&self) -> Result<()> {
        self.inner
            .transition(&[ScannerState::Scanning], ScannerState::Paused)
            .map(|_| ())
            .ok_or_else(|| ScanError::InvalidState(format!("cannot pause from {}", self.state())))
    }

    /// Continue discovery (Paused → Scanning)
    pub fn resume(&self) -> Result<()> {
        self.inner
            .transition(&[ScannerState::Paused], ScannerState::Scanning)
            .ok_or_else(|| ScanError::InvalidState(format!("cannot resume from {}", self.state())))?;
        self.inner.resume.notify_one();
        Ok(())
    }

    /// Stop the loop and wait for the in-flight pass to finish
    ///
    /// Safe to call in any state; returns once the engine is Stopped.
    pub async fn stop(&self) -> Result<()> {
        if self
            .inner
            .transition(&[ScannerState::Scanning, ScannerState::Paused], ScannerState::Stopping)
            .is_some()
        {
            info!("Stopping scan loop");
        }
        self.inner.cancel.cancel();
        self.wait().await;

        // Never started: no loop to finish the transition
        self.inner
            .transition(&[ScannerState::Idle, ScannerState::Stopping], ScannerState::Stopped);
        Ok(())
    }

    /// Wait for the scan loop to exit on its own (fatal error or stop)
    pub async fn wait(&self) {
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Scan loop task failed: {}", e);
            }
        }
    }

    /// Run one discovery pass now, outside the loop
    pub async fn run_pass(&self) -> Result<PassSummary> {
        self.inner.run_pass().await
    }

    /// Generate, log and publish the periodic reports
    pub async fn run_reports(&self) -> Result<ReportCounts> {
        self.inner.run_reports(self.passes()).await
    }
}

impl EngineInner {
    fn state(&self) -> ScannerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `to` if the current state is one of `from`; returns the old state
    fn transition(&self, from: &[ScannerState], to: ScannerState) -> Option<ScannerState> {
        let old = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if !from.contains(&*state) {
                return None;
            }
            std::mem::replace(&mut *state, to)
        };

        info!("Scanner state: {} -> {}", old, to);
        self.bus.publish(SwivelEvent::ScannerStateChanged {
            old_state: old,
            new_state: to,
            timestamp: time::now(),
        });
        Some(old)
    }

    fn publish_error(&self, message: String, fatal: bool) {
        self.bus.publish(SwivelEvent::ScannerError {
            message,
            fatal,
            timestamp: time::now(),
        });
    }

    /// Report a condition the loop cannot recover from and begin stopping
    fn fail(&self, message: String) {
        error!("Scan loop stopping: {}", message);
        self.publish_error(message, true);
        self.transition(&[ScannerState::Scanning, ScannerState::Paused], ScannerState::Stopping);
    }

    async fn scan_loop(self: Arc<Self>) {
        let mut store_failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if self.state() == ScannerState::Paused {
                tokio::select! {
                    _ = self.resume.notified() => continue,
                    _ = self.cancel.cancelled() => break,
                }
            }

            match self.run_pass().await {
                Ok(summary) => {
                    store_failures = 0;
                    if self.settings.reports_due(summary.pass) {
                        if let Err(e) = self.run_reports(summary.pass).await {
                            warn!("Report generation failed: {}", e);
                            self.publish_error(format!("Report generation failed: {}", e), false);
                        }
                    }
                }
                Err(ScanError::Radio(e)) if e.is_transient() => {
                    warn!("Discovery failed, retrying next pass: {}", e);
                    self.publish_error(e.to_string(), false);
                }
                Err(ScanError::Radio(e)) => {
                    self.fail(e.to_string());
                    break;
                }
                Err(ScanError::Store(e)) if e.is_unavailable() => {
                    store_failures += 1;
                    if store_failures >= self.settings.max_store_failures {
                        self.fail(format!("Store unavailable for {} consecutive passes: {}", store_failures, e));
                        break;
                    }
                    warn!(
                        "Store unavailable ({}/{}), pass aborted: {}",
                        store_failures, self.settings.max_store_failures, e
                    );
                    self.publish_error(e.to_string(), false);
                }
                Err(e) => {
                    error!("Pass failed: {}", e);
                    self.publish_error(e.to_string(), false);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.scan_interval()) => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        self.transition(
            &[ScannerState::Scanning, ScannerState::Paused, ScannerState::Stopping],
            ScannerState::Stopped,
        );
        info!("Scan loop exited after {} passes", self.passes.load(Ordering::SeqCst));
    }

    async fn run_reports(&self, pass: u64) -> Result<ReportCounts> {
        let reports = ReportSet::generate(&self.store).await?;
        reports.log();

        let counts = reports.counts();
        info!(
            "Reports for pass {}: {} places, {} multi-place devices, {} multi-place signatures",
            pass, counts.places, counts.multi_place_devices, counts.multi_place_signatures
        );
        self.bus.publish(SwivelEvent::ReportGenerated {
            counts,
            pass,
            timestamp: time::now(),
        });
        Ok(counts)
    }
}
