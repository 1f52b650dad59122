//! Runtime scan settings
//!
//! Loaded from the database `settings` table. A missing or NULL value falls
//! back to the built-in default, which is written back so the table always
//! shows the effective configuration.

use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use swivel_common::db::DEFAULT_PLACE_RADIUS_M;
use swivel_common::{time, Error, Result};
use tracing::{info, warn};

/// Runtime settings for the scan engine
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    /// Pause between the end of one pass and the start of the next
    pub scan_interval_ms: u64,
    /// Upper bound on a single radio discovery call
    pub discovery_timeout_ms: u64,
    /// Upper bound on a single location lookup
    pub location_timeout_ms: u64,
    /// Run and log the reports every N passes (0 disables)
    pub report_every_passes: u64,
    /// Radius given to places created from a sighting
    pub place_default_radius_m: f64,
    /// How long a location fix is reused
    pub location_cache_secs: u64,
    /// Consecutive passes aborted by an unavailable store before the engine stops
    pub max_store_failures: u32,
    /// Per-subscriber EventBus queue depth
    pub event_queue_capacity: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            scan_interval_ms: 5000,
            discovery_timeout_ms: 5000,
            location_timeout_ms: 10_000,
            report_every_passes: 12,
            place_default_radius_m: DEFAULT_PLACE_RADIUS_M,
            location_cache_secs: 60,
            max_store_failures: 3,
            event_queue_capacity: 256,
        }
    }
}

impl ScanSettings {
    /// Load runtime settings from database
    ///
    /// For each setting:
    /// 1. Try to read from database
    /// 2. If NULL or missing, use built-in default and write it back
    /// 3. If unparseable or out of range, warn and use the default (row left untouched)
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();

        let settings = Self {
            scan_interval_ms: get_or_default(pool, "scan_interval_ms", defaults.scan_interval_ms, |v| *v > 0).await?,
            discovery_timeout_ms: get_or_default(pool, "discovery_timeout_ms", defaults.discovery_timeout_ms, |v| *v > 0)
                .await?,
            location_timeout_ms: get_or_default(pool, "location_timeout_ms", defaults.location_timeout_ms, |v| *v > 0)
                .await?,
            report_every_passes: get_or_default(pool, "report_every_passes", defaults.report_every_passes, |_| true)
                .await?,
            place_default_radius_m: get_or_default(pool, "place_default_radius_m", defaults.place_default_radius_m, |v| {
                v.is_finite() && *v > 0.0
            })
            .await?,
            location_cache_secs: get_or_default(pool, "location_cache_secs", defaults.location_cache_secs, |_| true)
                .await?,
            max_store_failures: get_or_default(pool, "max_store_failures", defaults.max_store_failures, |v| *v > 0)
                .await?,
            event_queue_capacity: get_or_default(pool, "event_queue_capacity", defaults.event_queue_capacity, |v| *v > 0)
                .await?,
        };

        info!(
            "Scan settings: interval={}ms discovery_timeout={}ms report_every={} place_radius={}m",
            settings.scan_interval_ms,
            settings.discovery_timeout_ms,
            settings.report_every_passes,
            settings.place_default_radius_m
        );

        Ok(settings)
    }

    pub fn scan_interval(&self) -> Duration {
        time::millis_to_duration(self.scan_interval_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        time::millis_to_duration(self.discovery_timeout_ms)
    }

    pub fn location_timeout(&self) -> Duration {
        time::millis_to_duration(self.location_timeout_ms)
    }

    pub fn location_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.location_cache_secs)
    }

    /// Whether the reports are due after the given (1-based) pass
    pub fn reports_due(&self, pass: u64) -> bool {
        self.report_every_passes > 0 && pass > 0 && pass % self.report_every_passes == 0
    }
}

async fn get_or_default<T>(pool: &SqlitePool, key: &str, default: T, valid: fn(&T) -> bool) -> Result<T>
where
    T: FromStr + ToString,
{
    match get_setting::<String>(pool, key).await? {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) if valid(&value) => Ok(value),
            _ => {
                warn!("Invalid value '{}' for setting '{}', using default: {}", raw, key, default.to_string());
                Ok(default)
            }
        },
        None => {
            info!("Setting '{}' not found in database, using default: {}", key, default.to_string());
            set_setting(pool, key, default.to_string()).await?;
            Ok(default)
        }
    }
}

/// Read a raw setting; `None` when the key is missing or its value is NULL
pub async fn get_setting<T: FromStr>(pool: &SqlitePool, key: &str) -> Result<Option<T>> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match value.flatten() {
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("Failed to parse setting '{}' value: {}", key, s))),
        None => Ok(None),
    }
}

/// Insert or update a setting
pub async fn set_setting<T: ToString>(pool: &SqlitePool, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(pool)
    .await?;

    Ok(())
}
