//! Location capability
//!
//! Providers answer "where am I now", or `None` when no fix is available.
//! [`CachedLocation`] reuses a fix for a TTL so a burst of sightings does
//! not hammer the underlying provider.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use swivel_common::db::Coordinate;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Current-position source
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Current coordinate, or `None` when unavailable
    ///
    /// Implementations must not block indefinitely.
    async fn current_coordinate(&self) -> Option<Coordinate>;
}

/// Always reports the same position (or none)
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLocation(pub Option<Coordinate>);

impl FixedLocation {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self(Some(Coordinate::new(latitude, longitude)))
    }

    pub fn unavailable() -> Self {
        Self(None)
    }
}

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_coordinate(&self) -> Option<Coordinate> {
        self.0
    }
}

/// Caches successful fixes from an inner provider
///
/// A missing fix is never cached, so the next call asks again.
pub struct CachedLocation {
    inner: Arc<dyn LocationProvider>,
    ttl: Duration,
    cached: Mutex<Option<(Coordinate, Instant)>>,
}

impl CachedLocation {
    pub fn new(inner: Arc<dyn LocationProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LocationProvider for CachedLocation {
    async fn current_coordinate(&self) -> Option<Coordinate> {
        let mut cached = self.cached.lock().await;

        if let Some((coordinate, fetched_at)) = *cached {
            if fetched_at.elapsed() < self.ttl {
                return Some(coordinate);
            }
        }

        let fresh = self.inner.current_coordinate().await;
        match fresh {
            Some(coordinate) => {
                debug!("Location fix ({}, {})", coordinate.latitude, coordinate.longitude);
                *cached = Some((coordinate, Instant::now()));
            }
            None => {
                debug!("Location unavailable");
                *cached = None;
            }
        }
        fresh
    }
}
